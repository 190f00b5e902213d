//! Source chain adapter over an EVM JSON-RPC provider

use super::{ChainAdapter, EvmProvider, TxRef};
use crate::coordination::machine::SwapAction;
use crate::coordination::unix_now;
use crate::error::{RelayerError, RelayerResult, SubmitError};
use crate::events::abi::{escrow_topics, IEscrow};
use crate::events::{BlockRef, EventBatch, EvmEventDecoder};
use crate::swap::{ChainSide, SwapOrder};
use crate::tx::TransactionSender;

use alloy_primitives::FixedBytes;
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use ethers::signers::Signer;
use ethers::types::{Address, Filter, ValueOrArray, H256};
use std::sync::Arc;
use tracing::{debug, info};

/// Escrow adapter for the source chain
pub struct EvmAdapter<S> {
    provider: Arc<EvmProvider>,
    sender: TransactionSender<S>,
    decoder: EvmEventDecoder,
    factory_address: Address,
    escrow_address: Address,
}

impl<S: Signer> EvmAdapter<S> {
    pub fn new(provider: Arc<EvmProvider>, signer: S) -> RelayerResult<Self> {
        let config = provider.config();
        let factory_address = parse_address(&config.escrow_factory_address)?;
        let escrow_address = parse_address(&config.escrow_src_address)?;
        let sender = TransactionSender::new(provider.clone(), signer);

        info!(
            "EVM adapter for {} watching factory {:?} and escrow {:?}",
            config.name, factory_address, escrow_address
        );

        Ok(Self {
            provider,
            sender,
            decoder: EvmEventDecoder::new(ChainSide::Source),
            factory_address,
            escrow_address,
        })
    }

    /// Inclusive block range to scan after `since`, limited to confirmed blocks
    fn scan_range(&self, since: Option<BlockRef>, latest: u64) -> Option<(u64, u64)> {
        let config = self.provider.config();
        let confirmed = latest.checked_sub(config.confirmation_blocks)?;
        let from = match since {
            // A partially scanned block is rescanned; the ref filter drops what was seen
            Some(cursor) if cursor.index == u32::MAX => cursor.height + 1,
            Some(cursor) => cursor.height,
            None => config.start_block,
        };
        if from > confirmed {
            return None;
        }
        let to = confirmed.min(from + config.max_block_range - 1);
        Some((from, to))
    }
}

fn parse_address(value: &str) -> RelayerResult<Address> {
    value
        .parse()
        .map_err(|e| RelayerError::Config(format!("Invalid contract address {}: {}", value, e)))
}

/// ABI-encode the escrow call performing `action`
pub fn encode_action(order: &SwapOrder, action: &SwapAction) -> Vec<u8> {
    let order_hash = FixedBytes::from(*order.swap_id.as_bytes());
    match action {
        SwapAction::Reveal { secret, .. } => IEscrow::withdrawCall {
            orderHash: order_hash,
            secret: FixedBytes::from(*secret.as_bytes()),
        }
        .abi_encode(),
        SwapAction::Refund { .. } => IEscrow::cancelCall {
            orderHash: order_hash,
        }
        .abi_encode(),
    }
}

#[async_trait]
impl<S: Signer + 'static> ChainAdapter for EvmAdapter<S> {
    fn side(&self) -> ChainSide {
        ChainSide::Source
    }

    async fn poll_events(&self, since: Option<BlockRef>) -> RelayerResult<EventBatch> {
        let latest = self.provider.get_block_number().await?;
        let Some((from_block, to_block)) = self.scan_range(since, latest) else {
            return Ok(EventBatch::default());
        };

        debug!(
            "Chain {}: scanning blocks {} to {}",
            self.provider.config().name,
            from_block,
            to_block
        );

        let topics: Vec<Option<H256>> = escrow_topics()
            .into_iter()
            .map(|t| Some(H256::from(t.0)))
            .collect();
        let filter = Filter::new()
            .address(ValueOrArray::Array(vec![
                self.factory_address,
                self.escrow_address,
            ]))
            .topic0(ValueOrArray::Array(topics))
            .from_block(from_block)
            .to_block(to_block);

        let logs = self.provider.get_logs(&filter).await?;
        let observed_at = unix_now();

        let mut events = Vec::new();
        for log in &logs {
            if let Some(event) = self.decoder.decode(log, observed_at)? {
                if since.map_or(true, |cursor| event.block_ref > cursor) {
                    events.push(event);
                }
            }
        }
        events.sort_by_key(|e| e.block_ref);

        Ok(EventBatch {
            events,
            cursor: Some(BlockRef::end_of(to_block)),
        })
    }

    async fn submit_action(
        &self,
        order: &SwapOrder,
        action: &SwapAction,
    ) -> Result<TxRef, SubmitError> {
        let calldata = encode_action(order, action);
        let tx_hash = self.sender.send(self.escrow_address, calldata).await?;
        Ok(TxRef(format!("{:?}", tx_hash)))
    }

    async fn health_check(&self) -> bool {
        self.provider.health_check().await
    }
}
