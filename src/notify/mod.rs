//! Phase transition notifications
//!
//! The coordinator publishes a `PhaseTransition` for every phase change. Delivery
//! happens on a separate task so slow sinks never hold up swap decisions.

mod webhook;

pub use webhook::WebhookSink;

use crate::coordination::machine::SwapAction;
use crate::swap::{SwapId, SwapPhase};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A swap moved from one phase to another
#[derive(Debug, Clone, Serialize)]
pub struct PhaseTransition {
    pub swap_id: SwapId,
    pub from: SwapPhase,
    pub to: SwapPhase,
    /// Action dispatched together with the transition, if any
    pub action: Option<SwapAction>,
    pub at: DateTime<Utc>,
}

/// Receiver of phase transitions
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, transition: &PhaseTransition) -> anyhow::Result<()>;
}

/// Sink that logs transitions through tracing
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn deliver(&self, transition: &PhaseTransition) -> anyhow::Result<()> {
        info!(
            swap_id = %transition.swap_id,
            from = %transition.from,
            to = %transition.to,
            "Swap phase transition"
        );
        Ok(())
    }
}

/// Publishing side of the notification hub
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<PhaseTransition>,
}

impl Notifier {
    /// Create a notifier and spawn its delivery task
    pub fn spawn(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(deliver_all(rx, sinks));
        Self { tx }
    }

    /// Notifier whose transitions are handed to the returned receiver
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PhaseTransition>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn publish(&self, transition: PhaseTransition) {
        if let Err(mpsc::error::SendError(transition)) = self.tx.send(transition) {
            debug!(
                "Notification delivery task gone, dropping {} -> {} for swap {}",
                transition.from, transition.to, transition.swap_id
            );
        }
    }
}

async fn deliver_all(
    mut rx: mpsc::UnboundedReceiver<PhaseTransition>,
    sinks: Vec<Arc<dyn NotificationSink>>,
) {
    while let Some(transition) = rx.recv().await {
        for sink in &sinks {
            if let Err(e) = sink.deliver(&transition).await {
                warn!(
                    "Failed to deliver transition for swap {}: {}",
                    transition.swap_id, e
                );
            }
        }
    }
}
