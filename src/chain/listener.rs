//! Chain poller: feeds escrow events from one adapter to the coordinator

use super::ChainAdapter;
use crate::coordination::CoordinatorHandle;
use crate::error::{RelayerError, RelayerResult};
use crate::events::BlockRef;
use crate::store::EventStore;
use crate::swap::ChainSide;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Polls one chain and hands batches to the coordinator
pub struct ChainPoller {
    adapter: Arc<dyn ChainAdapter>,
    handle: CoordinatorHandle,
    store: Arc<dyn EventStore>,
    poll_interval: Duration,
}

impl ChainPoller {
    pub fn new(
        adapter: Arc<dyn ChainAdapter>,
        handle: CoordinatorHandle,
        store: Arc<dyn EventStore>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            adapter,
            handle,
            store,
            poll_interval,
        }
    }

    pub fn side(&self) -> ChainSide {
        self.adapter.side()
    }

    /// Poll until shutdown; returns an error only if the coordinator is gone
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> RelayerResult<()> {
        let side = self.side();
        let mut cursor = self.store.cursor(side).await?;
        info!(
            "Polling {} chain from {}",
            side,
            cursor.map_or_else(|| "the configured start".to_string(), |c| c.to_string())
        );

        loop {
            let caught_up = match self.poll_once(&mut cursor).await {
                Ok(caught_up) => caught_up,
                Err(RelayerError::CoordinatorClosed) => return Err(RelayerError::CoordinatorClosed),
                Err(e) if e.is_retryable() => {
                    warn!("Failed to poll {} chain: {}", side, e);
                    true
                }
                Err(e) => {
                    error!("Error polling {} chain: {}", side, e);
                    true
                }
            };

            // Drain backlog without waiting
            if !caught_up {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("Stopped polling {} chain", side);
        Ok(())
    }

    /// Poll once and forward the batch; true when there was nothing new
    async fn poll_once(&self, cursor: &mut Option<BlockRef>) -> RelayerResult<bool> {
        let side = self.side();
        let batch = self.adapter.poll_events(*cursor).await?;
        let next = batch.cursor;
        let count = batch.events.len();

        let advanced = match (next, *cursor) {
            (Some(next), Some(prev)) => next > prev,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if count == 0 && !advanced {
            return Ok(true);
        }

        if count > 0 {
            debug!("Forwarding {} {} events", count, side);
        }
        self.handle.observed(side, batch).await?;
        if advanced {
            *cursor = next;
        }
        Ok(count == 0 || !advanced)
    }
}
