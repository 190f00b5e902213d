//! Escrow contract ABI and EVM log decoding
//!
//! Escrow events are keyed by the order hash in the first indexed topic, so the
//! relayer never has to map escrow instance addresses back to swaps.

use super::{BlockRef, EscrowEvent, EventKind};
use crate::error::{RelayerError, RelayerResult};
use crate::swap::{ChainSide, Secret, SwapId};

use alloy_primitives::B256;
use alloy_sol_types::{sol, SolEvent};
use ethers::types::Log;

sol! {
    interface IEscrow {
        event EscrowCreated(bytes32 indexed orderHash, bytes32 hashlock, address escrow);
        event EscrowFunded(bytes32 indexed orderHash, address token, uint256 amount);
        event SecretRevealed(bytes32 indexed orderHash, bytes32 secret);
        event EscrowWithdrawal(bytes32 indexed orderHash, bytes32 secret);
        event EscrowCancelled(bytes32 indexed orderHash);
        event EscrowExpired(bytes32 indexed orderHash);

        function withdraw(bytes32 orderHash, bytes32 secret) external;
        function cancel(bytes32 orderHash) external;
    }
}

/// Topics the EVM listener filters on
pub fn escrow_topics() -> Vec<B256> {
    vec![
        IEscrow::EscrowCreated::SIGNATURE_HASH,
        IEscrow::EscrowFunded::SIGNATURE_HASH,
        IEscrow::SecretRevealed::SIGNATURE_HASH,
        IEscrow::EscrowWithdrawal::SIGNATURE_HASH,
        IEscrow::EscrowCancelled::SIGNATURE_HASH,
        IEscrow::EscrowExpired::SIGNATURE_HASH,
    ]
}

/// Decodes escrow logs into `EscrowEvent`s for one side of the swap
#[derive(Debug, Clone)]
pub struct EvmEventDecoder {
    side: ChainSide,
}

impl EvmEventDecoder {
    pub fn new(side: ChainSide) -> Self {
        Self { side }
    }

    /// Decode a log; logs with unrelated topics yield `None`
    pub fn decode(&self, log: &Log, observed_at: u64) -> RelayerResult<Option<EscrowEvent>> {
        let topics: Vec<B256> = log.topics.iter().map(|t| B256::from(t.0)).collect();
        let Some(topic0) = topics.first().copied() else {
            return Ok(None);
        };
        let data = log.data.as_ref();

        let (order_hash, kind) = if topic0 == IEscrow::EscrowCreated::SIGNATURE_HASH {
            let ev = decode_event::<IEscrow::EscrowCreated>(&topics, data)?;
            (ev.orderHash, EventKind::Created)
        } else if topic0 == IEscrow::EscrowFunded::SIGNATURE_HASH {
            let ev = decode_event::<IEscrow::EscrowFunded>(&topics, data)?;
            (ev.orderHash, EventKind::Funded)
        } else if topic0 == IEscrow::SecretRevealed::SIGNATURE_HASH {
            let ev = decode_event::<IEscrow::SecretRevealed>(&topics, data)?;
            let secret = Secret::from_bytes(ev.secret.0);
            (ev.orderHash, EventKind::SecretRevealed { secret })
        } else if topic0 == IEscrow::EscrowWithdrawal::SIGNATURE_HASH {
            let ev = decode_event::<IEscrow::EscrowWithdrawal>(&topics, data)?;
            let secret = Secret::from_bytes(ev.secret.0);
            (
                ev.orderHash,
                EventKind::Claimed {
                    secret: Some(secret),
                },
            )
        } else if topic0 == IEscrow::EscrowCancelled::SIGNATURE_HASH {
            let ev = decode_event::<IEscrow::EscrowCancelled>(&topics, data)?;
            (ev.orderHash, EventKind::Refunded)
        } else if topic0 == IEscrow::EscrowExpired::SIGNATURE_HASH {
            let ev = decode_event::<IEscrow::EscrowExpired>(&topics, data)?;
            (ev.orderHash, EventKind::Expired)
        } else {
            return Ok(None);
        };

        let height = log
            .block_number
            .ok_or_else(|| RelayerError::EventDecoding("log without block number".into()))?
            .as_u64();
        let index = log
            .log_index
            .ok_or_else(|| RelayerError::EventDecoding("log without log index".into()))?
            .as_u32();

        Ok(Some(EscrowEvent {
            side: self.side,
            swap_id: SwapId::from_bytes(order_hash.0),
            kind,
            observed_at,
            block_ref: BlockRef::new(height, index),
        }))
    }
}

fn decode_event<E: SolEvent>(topics: &[B256], data: &[u8]) -> RelayerResult<E> {
    E::decode_raw_log(topics.iter().copied(), data, true)
        .map_err(|e| RelayerError::EventDecoding(format!("{}: {}", E::SIGNATURE, e)))
}
