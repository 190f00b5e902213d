//! HTTP API for order registration, swap status and health checks

use crate::chain::ChainPair;
use crate::config::ApiConfig;
use crate::coordination::{outstanding_actions, replay, unix_now, CoordinatorHandle, SwapAction, SwapState};
use crate::error::{RelayerError, RelayerResult};
use crate::events::EscrowEvent;
use crate::store::{EventStore, StoreStats, SubmissionRecord};
use crate::swap::{ChainSide, SwapId, SwapOrder, SwapPhase};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EventStore>,
    pub chains: ChainPair,
    pub coordinator: CoordinatorHandle,
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/stats", get(get_stats))
        .route("/swaps", get(list_swaps).post(register_swap))
        .route("/swaps/:id", get(get_swap))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> RelayerResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayerError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| RelayerError::Internal(format!("API server failed: {}", e)))
}

/// Error body returned by the API
struct ApiError(RelayerError);

impl From<RelayerError> for ApiError {
    fn from(e: RelayerError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RelayerError::InvalidOrder { .. } | RelayerError::EventDecoding(_) => {
                StatusCode::BAD_REQUEST
            }
            RelayerError::SwapNotFound { .. } => StatusCode::NOT_FOUND,
            RelayerError::CoordinatorClosed => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!("API request failed: {}", self.0);
        }

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - verify the store and both chains
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = state.store.health_check().await.is_ok();
    let chain_health = state.chains.health_check().await;
    let chains_ok = chain_health.iter().all(|(_, healthy)| *healthy);

    let ready = db_ok && chains_ok;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            database: db_ok,
            chains: chain_health
                .into_iter()
                .map(|(side, healthy)| ChainHealth { side, healthy })
                .collect(),
        }),
    )
}

async fn get_stats(State(state): State<AppState>) -> Result<Json<StoreStats>, ApiError> {
    Ok(Json(state.store.stats().await?))
}

/// Register a matched order with the coordinator
async fn register_swap(
    State(state): State<AppState>,
    Json(order): Json<SwapOrder>,
) -> Result<impl IntoResponse, ApiError> {
    let swap_id = order.swap_id;
    let phase = state.coordinator.register(order).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(RegisterResponse { swap_id, phase }),
    ))
}

/// Orders the coordinator still tracks
async fn list_swaps(State(state): State<AppState>) -> Result<Json<Vec<SwapSummary>>, ApiError> {
    let orders = state.store.open_orders().await?;

    Ok(Json(
        orders
            .into_iter()
            .map(|order| SwapSummary {
                swap_id: order.swap_id,
                phase: order.status,
                source_timeout: order.source_timeout,
                dest_timeout: order.dest_timeout,
            })
            .collect(),
    ))
}

/// Full view of one swap rebuilt from its stored history
async fn get_swap(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SwapDetail>, ApiError> {
    let swap_id: SwapId = id.parse()?;
    let order = state
        .store
        .order(&swap_id)
        .await?
        .ok_or_else(|| RelayerError::SwapNotFound {
            swap_id: swap_id.to_hex(),
        })?;

    let now = unix_now();
    let events = state.store.events_for(&swap_id).await?;
    let derived = replay(&order, &events, now);
    let outstanding = outstanding_actions(&order, &derived, now);
    let submissions = state.store.submissions_for(&swap_id).await?;

    Ok(Json(SwapDetail {
        order,
        state: derived,
        outstanding,
        events,
        submissions,
    }))
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    database: bool,
    chains: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    side: ChainSide,
    healthy: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct RegisterResponse {
    swap_id: SwapId,
    phase: SwapPhase,
}

#[derive(Serialize)]
struct SwapSummary {
    swap_id: SwapId,
    phase: SwapPhase,
    source_timeout: u64,
    dest_timeout: u64,
}

#[derive(Serialize)]
struct SwapDetail {
    order: SwapOrder,
    state: SwapState,
    outstanding: Vec<SwapAction>,
    events: Vec<EscrowEvent>,
    submissions: Vec<SubmissionRecord>,
}
