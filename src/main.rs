//! Atomic Swap Relayer - EVM to Cardano hashlock/timelock swap coordination
//!
//! This relayer watches the source and destination escrows of matched swap
//! orders, relays revealed secrets and refunds expired escrows.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use atomic_swap_relayer::api::{self, AppState};
use atomic_swap_relayer::chain::{CardanoAdapter, ChainAdapter, ChainPair, ChainPoller, EvmAdapter, EvmProvider};
use atomic_swap_relayer::config::Settings;
use atomic_swap_relayer::coordination::{unix_now, Coordinator};
use atomic_swap_relayer::metrics::{self, MetricsServer};
use atomic_swap_relayer::notify::{NotificationSink, Notifier, TracingSink, WebhookSink};
use atomic_swap_relayer::store::{EventStore, PgEventStore};
use atomic_swap_relayer::tx::{load_wallet, RemoteSigner};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Atomic Swap Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for instance {}: {} -> {}",
        settings.relayer.instance_id,
        settings.chains.source.name,
        settings.chains.destination.name
    );

    // Initialize database connection
    let pg_store = PgEventStore::new(&settings.database).await?;
    info!("Database connection established");

    // Run migrations
    pg_store.run_migrations().await?;
    info!("Database migrations complete");
    let store: Arc<dyn EventStore> = Arc::new(pg_store);

    // Chain adapters
    let provider = Arc::new(EvmProvider::new(settings.chains.source.clone())?);
    let wallet = load_wallet(&settings.wallet)?;
    let source: Arc<dyn ChainAdapter> = Arc::new(EvmAdapter::new(provider, wallet)?);

    let destination = &settings.chains.destination;
    let remote_signer = RemoteSigner::new(
        destination.signer_url.clone(),
        Duration::from_secs(destination.request_timeout_secs),
    )?;
    let dest: Arc<dyn ChainAdapter> =
        Arc::new(CardanoAdapter::new(destination.clone(), remote_signer)?);
    let chains = ChainPair::new(source, dest);
    info!("Chain adapters initialized");

    // Notification sinks
    let mut sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(TracingSink)];
    if let Some(url) = &settings.notifications.webhook_url {
        sinks.push(Arc::new(WebhookSink::new(
            url,
            settings.notifications.webhook_retries,
        )?));
        info!("Webhook notifications enabled");
    }
    let notifier = Notifier::spawn(sinks);

    // Initialize coordinator and rebuild open swaps
    let (mut coordinator, handle) = Coordinator::new(
        store.clone(),
        chains.clone(),
        settings.relayer.clone(),
        notifier,
    );
    let recovered = coordinator.recover(unix_now()).await?;
    info!("Coordinator initialized with {} recovered swaps", recovered);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start chain pollers
    let poller_handles: Vec<_> = [chains.source.clone(), chains.dest.clone()]
        .into_iter()
        .map(|adapter| {
            let poller = ChainPoller::new(
                adapter,
                handle.clone(),
                store.clone(),
                settings.relayer.poll_interval(),
            );
            let side = poller.side();
            let shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                if let Err(e) = poller.run(shutdown).await {
                    error!("Poller for {} chain stopped: {}", side, e);
                }
            })
        })
        .collect();

    // Start API server
    let api_handle = tokio::spawn({
        let state = AppState {
            store: store.clone(),
            chains: chains.clone(),
            coordinator: handle.clone(),
        };
        let config = settings.api.clone();
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Health check loop
    let health_handle = tokio::spawn({
        let chains = chains.clone();
        let store = store.clone();
        let interval = settings.relayer.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(Duration::from_secs(interval)).await;

                let mut healthy = true;
                for (side, chain_ok) in chains.health_check().await {
                    if !chain_ok {
                        warn!("{} chain health check failed", side);
                        healthy = false;
                    }
                }

                if let Err(e) = store.health_check().await {
                    warn!("Database health check failed: {}", e);
                    healthy = false;
                }

                if healthy {
                    metrics::record_health_check();
                } else {
                    metrics::record_health_check_failure();
                }
            }
        }
    });

    info!("Atomic Swap Relayer is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Run the coordinator until a shutdown signal arrives or it fails
    let result = coordinator.run_until(shutdown_signal(), &shutdown_tx).await;

    // Pollers saw the shutdown broadcast and finish their current step
    for handle in poller_handles {
        let _ = handle.await;
    }

    // Abort background tasks
    api_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    match result {
        Ok(()) => {
            info!("Atomic Swap Relayer stopped");
            Ok(())
        }
        Err(e) => {
            error!("Coordinator failed, Atomic Swap Relayer stopped: {}", e);
            Err(e.into())
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,atomic_swap_relayer=debug,sqlx=warn,hyper=warn")
    });

    let json = std::env::var("RELAYER_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
