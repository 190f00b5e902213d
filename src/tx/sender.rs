//! Source chain transaction sender
//!
//! Builds, signs and broadcasts escrow calls. Failures are classified into the
//! submission taxonomy; retrying is left to the coordinator.

use super::gas::GasEstimator;
use super::nonce::NonceManager;
use crate::chain::{EvmProvider, GasPrice};
use crate::error::{RelayerError, SubmitError};

use ethers::prelude::*;
use ethers::signers::Signer;
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends escrow transactions signed by `S`
pub struct TransactionSender<S> {
    provider: Arc<EvmProvider>,
    nonce_manager: NonceManager,
    gas_estimator: GasEstimator,
    signer: S,
}

impl<S: Signer> TransactionSender<S> {
    pub fn new(provider: Arc<EvmProvider>, signer: S) -> Self {
        let signer = signer.with_chain_id(provider.chain_id());
        info!("Transaction sender initialized with wallet: {:?}", signer.address());

        Self {
            nonce_manager: NonceManager::new(signer.address()),
            gas_estimator: GasEstimator::new(),
            provider,
            signer,
        }
    }

    pub fn wallet_address(&self) -> Address {
        self.signer.address()
    }

    /// Build, sign and broadcast a call to `to`
    pub async fn send(&self, to: Address, calldata: Vec<u8>) -> Result<H256, SubmitError> {
        let nonce = self
            .nonce_manager
            .next_nonce(&self.provider)
            .await
            .map_err(classify_relayer_error)?;

        match self.send_with_nonce(to, calldata, nonce).await {
            Ok(tx_hash) => Ok(tx_hash),
            Err(SendFailure::NotBroadcast(e)) => {
                self.nonce_manager.release(nonce).await;
                Err(e)
            }
            Err(SendFailure::Broadcast(e)) => {
                if let SubmitError::Network(ref msg) = e {
                    if msg.contains("nonce too low") {
                        self.nonce_manager.reset().await;
                    }
                }
                Err(e)
            }
        }
    }

    async fn send_with_nonce(
        &self,
        to: Address,
        calldata: Vec<u8>,
        nonce: u64,
    ) -> Result<H256, SendFailure> {
        let mut estimate_tx: TypedTransaction = TransactionRequest::new()
            .from(self.signer.address())
            .to(to)
            .data(calldata.clone())
            .nonce(nonce)
            .into();
        estimate_tx.set_chain_id(self.provider.chain_id());

        // A reverting call is rejected here, before any nonce is consumed
        let estimate = self
            .provider
            .estimate_gas(&estimate_tx)
            .await
            .map_err(|e| SendFailure::NotBroadcast(classify_relayer_error(e)))?;
        let gas_limit = self.gas_estimator.buffered_gas_limit(estimate);
        let gas_price = self
            .gas_estimator
            .get_gas_price(&self.provider)
            .await
            .map_err(|e| SendFailure::NotBroadcast(classify_relayer_error(e)))?;

        debug!(
            "Sending escrow call to {:?}: nonce {}, gas {}, max cost {} wei",
            to,
            nonce,
            gas_limit,
            GasEstimator::calculate_cost(gas_limit, &gas_price)
        );

        let tx = self.build_tx(to, calldata, nonce, gas_limit, &gas_price);
        let signature = self
            .signer
            .sign_transaction(&tx)
            .await
            .map_err(|e| SendFailure::NotBroadcast(SubmitError::NotAuthorized(e.to_string())))?;
        let raw = tx.rlp_signed(&signature);

        match timeout(SEND_TIMEOUT, self.provider.send_raw_transaction(raw)).await {
            Ok(Ok(tx_hash)) => {
                info!("Transaction sent: {:?} (nonce {})", tx_hash, nonce);
                Ok(tx_hash)
            }
            Ok(Err(e)) => Err(SendFailure::Broadcast(classify_relayer_error(e))),
            Err(_) => {
                warn!("Transaction send timeout (nonce {})", nonce);
                Err(SendFailure::Broadcast(SubmitError::Network(
                    "send transaction timed out".to_string(),
                )))
            }
        }
    }

    fn build_tx(
        &self,
        to: Address,
        calldata: Vec<u8>,
        nonce: u64,
        gas_limit: U256,
        gas_price: &GasPrice,
    ) -> TypedTransaction {
        let mut tx: TypedTransaction = match gas_price {
            GasPrice::Legacy(price) => TransactionRequest::new()
                .to(to)
                .data(calldata)
                .nonce(nonce)
                .gas(gas_limit)
                .gas_price(*price)
                .into(),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => Eip1559TransactionRequest::new()
                .to(to)
                .data(calldata)
                .nonce(nonce)
                .gas(gas_limit)
                .max_fee_per_gas(*max_fee_per_gas)
                .max_priority_fee_per_gas(*max_priority_fee_per_gas)
                .into(),
        };
        tx.set_from(self.signer.address());
        tx.set_chain_id(self.provider.chain_id());
        tx
    }
}

enum SendFailure {
    /// The nonce was not consumed
    NotBroadcast(SubmitError),
    /// The node saw the transaction; the nonce may be consumed
    Broadcast(SubmitError),
}

fn classify_relayer_error(err: RelayerError) -> SubmitError {
    match err {
        RelayerError::ChainConnection { message, .. } => classify_send_error(&message),
        other => SubmitError::Network(other.to_string()),
    }
}

/// Map a node error message onto the submission taxonomy
pub fn classify_send_error(message: &str) -> SubmitError {
    let lower = message.to_lowercase();

    if lower.contains("already withdrawn")
        || lower.contains("already cancelled")
        || lower.contains("already settled")
        || lower.contains("invalid escrow state")
    {
        SubmitError::AlreadySettled
    } else if lower.contains("insufficient funds") {
        SubmitError::InsufficientFunds(message.to_string())
    } else if lower.contains("unauthorized")
        || lower.contains("invalid caller")
        || lower.contains("invalid secret")
        || lower.contains("invalid time")
        || lower.contains("execution reverted")
    {
        SubmitError::NotAuthorized(message.to_string())
    } else {
        SubmitError::Network(message.to_string())
    }
}
