//! Escrow lifecycle events observed on either chain
//!
//! Events are append-only facts. Each carries the chain-specific position it was
//! observed at, which doubles as its idempotency key together with the side and
//! swap id.

pub mod abi;

pub use abi::EvmEventDecoder;

use crate::swap::{ChainSide, Secret, SwapId};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Chain-specific position of an event
///
/// EVM: block number and log index. Cardano: slot and event index within the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockRef {
    pub height: u64,
    pub index: u32,
}

impl BlockRef {
    pub fn new(height: u64, index: u32) -> Self {
        Self { height, index }
    }

    /// Cursor positioned after every event of block `height`
    pub fn end_of(height: u64) -> Self {
        Self {
            height,
            index: u32::MAX,
        }
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.index == u32::MAX {
            write!(f, "{}/*", self.height)
        } else {
            write!(f, "{}/{}", self.height, self.index)
        }
    }
}

/// What happened to an escrow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Funded,
    /// Secret published on this chain without a withdrawal
    SecretRevealed { secret: Secret },
    /// Escrow withdrawn by its taker; withdrawals carry the secret when the chain exposes it
    Claimed {
        #[serde(default)]
        secret: Option<Secret>,
    },
    Refunded,
    Expired,
}

impl EventKind {
    /// Get event name for metrics and storage
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Funded => "funded",
            EventKind::SecretRevealed { .. } => "secret_revealed",
            EventKind::Claimed { .. } => "claimed",
            EventKind::Refunded => "refunded",
            EventKind::Expired => "expired",
        }
    }

    /// Secret carried by the event, if any
    pub fn secret(&self) -> Option<&Secret> {
        match self {
            EventKind::SecretRevealed { secret } => Some(secret),
            EventKind::Claimed { secret } => secret.as_ref(),
            _ => None,
        }
    }
}

/// A single observed on-chain fact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowEvent {
    pub side: ChainSide,
    pub swap_id: SwapId,
    #[serde(flatten)]
    pub kind: EventKind,
    /// Wall-clock arrival at the relayer (UNIX seconds)
    pub observed_at: u64,
    pub block_ref: BlockRef,
}

impl EscrowEvent {
    /// Idempotency key of the event
    pub fn key(&self) -> (ChainSide, SwapId, BlockRef) {
        (self.side, self.swap_id, self.block_ref)
    }
}

/// Result of one `poll_events` call
#[derive(Debug, Clone, Default)]
pub struct EventBatch {
    /// Events strictly after the requested cursor, in chain order
    pub events: Vec<EscrowEvent>,
    /// Position to resume from on the next call; `None` when nothing was scanned
    pub cursor: Option<BlockRef>,
}

impl EventBatch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
