//! Escrow event store
//!
//! Durable record of:
//! - Every escrow event observed on either chain (append-only, idempotent)
//! - Per-chain poll cursors for restart recovery
//! - Registered swap orders with their latest phase
//! - Action submissions

mod memory;
mod postgres;

pub use memory::MemoryEventStore;
pub use postgres::PgEventStore;

use crate::coordination::machine::ActionKind;
use crate::error::RelayerResult;
use crate::events::{BlockRef, EscrowEvent};
use crate::swap::{ChainSide, Secret, SwapId, SwapOrder, SwapPhase};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Mutable part of a registered order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderUpdate {
    pub swap_id: SwapId,
    pub phase: SwapPhase,
    pub revealed_secret: Option<Secret>,
    /// Cleared once the swap is terminal and nothing is left to submit
    pub open: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Submitted,
    AlreadySettled,
    Failed,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::AlreadySettled => "already_settled",
            SubmissionStatus::Failed => "failed",
        }
    }
}

/// One attempt at submitting an action
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionRecord {
    pub id: Uuid,
    pub swap_id: SwapId,
    pub side: ChainSide,
    pub kind: ActionKind,
    pub attempt: u32,
    pub status: SubmissionStatus,
    pub tx_ref: Option<String>,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate counters for the stats endpoint
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub orders_by_phase: BTreeMap<String, u64>,
    pub open_orders: u64,
    pub events: u64,
    pub submissions: u64,
}

/// Storage backend for events, cursors and orders
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append an event; returns false if `(side, swap_id, block_ref)` was already stored
    async fn append(&self, event: &EscrowEvent) -> RelayerResult<bool>;

    /// Events of one swap in the order they were appended
    async fn events_for(&self, swap_id: &SwapId) -> RelayerResult<Vec<EscrowEvent>>;

    async fn cursor(&self, side: ChainSide) -> RelayerResult<Option<BlockRef>>;

    async fn save_cursor(&self, side: ChainSide, cursor: BlockRef) -> RelayerResult<()>;

    /// Register an order; returns false if it was already registered
    async fn put_order(&self, order: &SwapOrder) -> RelayerResult<bool>;

    async fn update_order(&self, update: &OrderUpdate) -> RelayerResult<()>;

    async fn order(&self, swap_id: &SwapId) -> RelayerResult<Option<SwapOrder>>;

    /// Orders still tracked by the coordinator
    async fn open_orders(&self) -> RelayerResult<Vec<SwapOrder>>;

    async fn record_submission(&self, record: &SubmissionRecord) -> RelayerResult<()>;

    async fn submissions_for(&self, swap_id: &SwapId) -> RelayerResult<Vec<SubmissionRecord>>;

    async fn stats(&self) -> RelayerResult<StoreStats>;

    async fn health_check(&self) -> RelayerResult<()>;
}
