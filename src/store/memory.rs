//! In-memory event store for tests and dry runs

use super::{EventStore, OrderUpdate, StoreStats, SubmissionRecord};
use crate::error::{RelayerError, RelayerResult};
use crate::events::{BlockRef, EscrowEvent};
use crate::swap::{ChainSide, SwapId, SwapOrder};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tokio::sync::RwLock;

/// Event store backed by process memory
#[derive(Default)]
pub struct MemoryEventStore {
    seen: DashSet<(ChainSide, SwapId, BlockRef)>,
    events: DashMap<SwapId, Vec<EscrowEvent>>,
    cursors: DashMap<ChainSide, BlockRef>,
    /// Orders with their open flag
    orders: DashMap<SwapId, (SwapOrder, bool)>,
    submissions: RwLock<Vec<SubmissionRecord>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, event: &EscrowEvent) -> RelayerResult<bool> {
        if !self.seen.insert(event.key()) {
            return Ok(false);
        }
        self.events
            .entry(event.swap_id)
            .or_default()
            .push(event.clone());
        Ok(true)
    }

    async fn events_for(&self, swap_id: &SwapId) -> RelayerResult<Vec<EscrowEvent>> {
        Ok(self
            .events
            .get(swap_id)
            .map(|events| events.clone())
            .unwrap_or_default())
    }

    async fn cursor(&self, side: ChainSide) -> RelayerResult<Option<BlockRef>> {
        Ok(self.cursors.get(&side).map(|c| *c))
    }

    async fn save_cursor(&self, side: ChainSide, cursor: BlockRef) -> RelayerResult<()> {
        self.cursors.insert(side, cursor);
        Ok(())
    }

    async fn put_order(&self, order: &SwapOrder) -> RelayerResult<bool> {
        match self.orders.entry(order.swap_id) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert((order.clone(), true));
                Ok(true)
            }
        }
    }

    async fn update_order(&self, update: &OrderUpdate) -> RelayerResult<()> {
        let mut entry = self
            .orders
            .get_mut(&update.swap_id)
            .ok_or_else(|| RelayerError::SwapNotFound {
                swap_id: update.swap_id.to_hex(),
            })?;
        let (order, open) = entry.value_mut();
        order.status = update.phase;
        order.revealed_secret = update.revealed_secret;
        *open = update.open;
        Ok(())
    }

    async fn order(&self, swap_id: &SwapId) -> RelayerResult<Option<SwapOrder>> {
        Ok(self.orders.get(swap_id).map(|entry| entry.0.clone()))
    }

    async fn open_orders(&self) -> RelayerResult<Vec<SwapOrder>> {
        let mut orders: Vec<SwapOrder> = self
            .orders
            .iter()
            .filter(|entry| entry.1)
            .map(|entry| entry.0.clone())
            .collect();
        orders.sort_by_key(|order| order.swap_id);
        Ok(orders)
    }

    async fn record_submission(&self, record: &SubmissionRecord) -> RelayerResult<()> {
        self.submissions.write().await.push(record.clone());
        Ok(())
    }

    async fn submissions_for(&self, swap_id: &SwapId) -> RelayerResult<Vec<SubmissionRecord>> {
        Ok(self
            .submissions
            .read()
            .await
            .iter()
            .filter(|record| record.swap_id == *swap_id)
            .cloned()
            .collect())
    }

    async fn stats(&self) -> RelayerResult<StoreStats> {
        let mut stats = StoreStats {
            events: self.seen.len() as u64,
            submissions: self.submissions.read().await.len() as u64,
            ..StoreStats::default()
        };
        for entry in self.orders.iter() {
            let (order, open) = entry.value();
            *stats
                .orders_by_phase
                .entry(order.status.as_str().to_string())
                .or_default() += 1;
            if *open {
                stats.open_orders += 1;
            }
        }
        Ok(stats)
    }

    async fn health_check(&self) -> RelayerResult<()> {
        Ok(())
    }
}
