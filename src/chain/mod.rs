//! Chain module - uniform access to both escrow chains
//!
//! This module provides:
//! - The `ChainAdapter` seam the coordinator polls and submits through
//! - An EVM adapter with multi-RPC failover for the source chain
//! - A Cardano adapter over an escrow indexer and submit API for the destination chain
//! - Per-chain pollers feeding the coordinator

pub mod cardano;
pub mod evm;
pub mod listener;
pub mod provider;

pub use cardano::CardanoAdapter;
pub use evm::EvmAdapter;
pub use listener::ChainPoller;
pub use provider::{EvmProvider, GasPrice};

use crate::coordination::machine::SwapAction;
use crate::error::{RelayerResult, SubmitError};
use crate::events::{BlockRef, EventBatch};
use crate::swap::{ChainSide, SwapOrder};

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Reference to a submitted transaction (hash or tx id)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxRef(pub String);

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read and write access to the escrows of one chain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn side(&self) -> ChainSide;

    /// Events strictly after `since`, plus the cursor to resume from
    async fn poll_events(&self, since: Option<BlockRef>) -> RelayerResult<EventBatch>;

    /// Submit a reveal or refund for `order`
    async fn submit_action(
        &self,
        order: &SwapOrder,
        action: &SwapAction,
    ) -> Result<TxRef, SubmitError>;

    async fn health_check(&self) -> bool;
}

/// The source and destination adapters of the relayer
#[derive(Clone)]
pub struct ChainPair {
    pub source: Arc<dyn ChainAdapter>,
    pub dest: Arc<dyn ChainAdapter>,
}

impl ChainPair {
    pub fn new(source: Arc<dyn ChainAdapter>, dest: Arc<dyn ChainAdapter>) -> Self {
        Self { source, dest }
    }

    pub fn get(&self, side: ChainSide) -> &Arc<dyn ChainAdapter> {
        match side {
            ChainSide::Source => &self.source,
            ChainSide::Dest => &self.dest,
        }
    }

    /// Health check for both chains
    pub async fn health_check(&self) -> Vec<(ChainSide, bool)> {
        let (source, dest) =
            futures::future::join(self.source.health_check(), self.dest.health_check()).await;

        crate::metrics::record_chain_health(ChainSide::Source, source);
        crate::metrics::record_chain_health(ChainSide::Dest, dest);

        vec![(ChainSide::Source, source), (ChainSide::Dest, dest)]
    }
}
