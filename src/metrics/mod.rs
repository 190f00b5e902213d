//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain health and cursor height
//! - Escrow events by kind
//! - Swap phase transitions
//! - Action submissions and their failures

use crate::coordination::ActionKey;
use crate::error::{RelayerError, RelayerResult};
use crate::swap::{ChainSide, SwapPhase};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Encoder, Gauge,
    GaugeVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_HEALTHY: GaugeVec = register_gauge_vec!(
        "swap_relayer_chain_healthy",
        "Chain health status (1=healthy, 0=unhealthy)",
        &["side"]
    ).unwrap();

    pub static ref CHAIN_CURSOR: GaugeVec = register_gauge_vec!(
        "swap_relayer_chain_cursor_height",
        "Height of the last durable cursor per chain",
        &["side"]
    ).unwrap();

    // Event metrics
    pub static ref EVENTS_RECEIVED: CounterVec = register_counter_vec!(
        "swap_relayer_events_received_total",
        "Escrow events appended to the store",
        &["side", "kind"]
    ).unwrap();

    pub static ref EVENTS_DUPLICATE: CounterVec = register_counter_vec!(
        "swap_relayer_events_duplicate_total",
        "Escrow events already present in the store",
        &["side"]
    ).unwrap();

    pub static ref INVALID_SECRETS: CounterVec = register_counter_vec!(
        "swap_relayer_invalid_secrets_total",
        "Reveals whose secret did not match the hashlock",
        &["side"]
    ).unwrap();

    // Swap metrics
    pub static ref PHASE_TRANSITIONS: CounterVec = register_counter_vec!(
        "swap_relayer_phase_transitions_total",
        "Swap phase transitions by target phase",
        &["phase"]
    ).unwrap();

    pub static ref TRACKED_SWAPS: Gauge = register_gauge!(
        "swap_relayer_tracked_swaps",
        "Open swaps held by the coordinator"
    ).unwrap();

    // Action metrics
    pub static ref ACTIONS_SUBMITTED: CounterVec = register_counter_vec!(
        "swap_relayer_actions_submitted_total",
        "Action submissions started",
        &["side", "action"]
    ).unwrap();

    pub static ref ACTIONS_SETTLED: CounterVec = register_counter_vec!(
        "swap_relayer_actions_settled_total",
        "Actions no longer required after on-chain confirmation",
        &["side", "action"]
    ).unwrap();

    pub static ref ACTIONS_FAILED: CounterVec = register_counter_vec!(
        "swap_relayer_actions_failed_total",
        "Failed action submissions by reason",
        &["side", "action", "reason"]
    ).unwrap();

    pub static ref ACTIONS_RETRIED: CounterVec = register_counter_vec!(
        "swap_relayer_actions_retried_total",
        "Action resubmissions",
        &["side", "action"]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "swap_relayer_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "swap_relayer_health_check_failure_total",
        "Total failed health checks",
        &[]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> RelayerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayerError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| RelayerError::Internal(format!("Metrics server failed: {}", e)))
    }
}

/// Render all registered metrics in the text exposition format
pub fn render() -> RelayerResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| RelayerError::Internal(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer).map_err(|e| RelayerError::Internal(e.to_string()))
}

async fn metrics_handler() -> (StatusCode, String) {
    match render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// Helper functions to record metrics

pub fn record_chain_health(side: ChainSide, healthy: bool) {
    CHAIN_HEALTHY
        .with_label_values(&[side.as_str()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_cursor(side: ChainSide, height: u64) {
    CHAIN_CURSOR
        .with_label_values(&[side.as_str()])
        .set(height as f64);
}

pub fn record_event(side: ChainSide, kind: &str) {
    EVENTS_RECEIVED
        .with_label_values(&[side.as_str(), kind])
        .inc();
}

pub fn record_duplicate_event(side: ChainSide) {
    EVENTS_DUPLICATE.with_label_values(&[side.as_str()]).inc();
}

pub fn record_invalid_secret(side: ChainSide) {
    INVALID_SECRETS.with_label_values(&[side.as_str()]).inc();
}

pub fn record_phase_transition(phase: SwapPhase) {
    PHASE_TRANSITIONS
        .with_label_values(&[phase.as_str()])
        .inc();
}

pub fn set_tracked_swaps(count: usize) {
    TRACKED_SWAPS.set(count as f64);
}

pub fn record_action_submitted(key: ActionKey) {
    ACTIONS_SUBMITTED
        .with_label_values(&[key.side.as_str(), key.kind.as_str()])
        .inc();
}

pub fn record_action_settled(key: ActionKey) {
    ACTIONS_SETTLED
        .with_label_values(&[key.side.as_str(), key.kind.as_str()])
        .inc();
}

pub fn record_action_failed(key: ActionKey, reason: &str) {
    ACTIONS_FAILED
        .with_label_values(&[key.side.as_str(), key.kind.as_str(), reason])
        .inc();
}

pub fn record_submission_retry(key: ActionKey) {
    ACTIONS_RETRIED
        .with_label_values(&[key.side.as_str(), key.kind.as_str()])
        .inc();
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::ActionKind;

    #[test]
    fn test_render_includes_recorded_series() {
        record_event(ChainSide::Dest, "funded");
        record_action_failed(
            ActionKey {
                side: ChainSide::Source,
                kind: ActionKind::Reveal,
            },
            "network",
        );

        let body = render().unwrap();
        assert!(body.contains("swap_relayer_events_received_total"));
        assert!(body.contains(r#"reason="network""#));
    }
}
