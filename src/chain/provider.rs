//! EVM provider with multi-RPC support and automatic failover

use crate::config::{EvmChainConfig, GasPriceStrategy};
use crate::error::{RelayerError, RelayerResult};

use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

/// Multi-provider wrapper with automatic failover
pub struct EvmProvider {
    /// Chain configuration
    config: EvmChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    /// Last known block number
    last_block: RwLock<u64>,
}

impl EvmProvider {
    /// Create a new provider; no network calls are made here
    pub fn new(config: EvmChainConfig) -> RelayerResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.name, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(RelayerError::ChainConnection {
                chain: config.name.clone(),
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
            last_block: RwLock::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.name, next);
    }

    fn connection_error(&self, message: impl Into<String>) -> RelayerError {
        RelayerError::ChainConnection {
            chain: self.config.name.clone(),
            message: message.into(),
        }
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> RelayerResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => {
                    let block_num = block.as_u64();
                    *self.last_block.write().await = block_num;
                    return Ok(block_num);
                }
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.config.name, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed"))
    }

    /// Last block number seen by `get_block_number`
    pub async fn last_block(&self) -> u64 {
        *self.last_block.read().await
    }

    /// Get logs for a filter
    pub async fn get_logs(&self, filter: &Filter) -> RelayerResult<Vec<Log>> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_logs(filter).await {
                Ok(logs) => return Ok(logs),
                Err(e) => {
                    warn!("Failed to get logs from chain {}: {}", self.config.name, e);
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed to get logs"))
    }

    /// Pending nonce of `address`, with failover
    pub async fn get_transaction_count(&self, address: Address) -> RelayerResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self
                .http()
                .get_transaction_count(address, Some(BlockNumber::Pending.into()))
                .await
            {
                Ok(count) => return Ok(count.as_u64()),
                Err(e) => {
                    warn!("Failed to get nonce from chain {}: {}", self.config.name, e);
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed to get nonce"))
    }

    /// Estimate gas for a transaction; the error message carries the revert reason
    pub async fn estimate_gas(&self, tx: &TypedTransaction) -> RelayerResult<U256> {
        self.http()
            .estimate_gas(tx, None)
            .await
            .map_err(|e| self.connection_error(e.to_string()))
    }

    /// Broadcast a signed transaction
    pub async fn send_raw_transaction(&self, raw: Bytes) -> RelayerResult<H256> {
        self.http()
            .send_raw_transaction(raw)
            .await
            .map(|pending| pending.tx_hash())
            .map_err(|e| self.connection_error(e.to_string()))
    }

    /// Get current gas price based on chain strategy
    pub async fn get_gas_price(&self) -> RelayerResult<GasPrice> {
        match self.config.gas_price_strategy {
            GasPriceStrategy::Legacy => {
                let price = self
                    .http()
                    .get_gas_price()
                    .await
                    .map_err(|e| self.connection_error(e.to_string()))?;
                Ok(GasPrice::Legacy(price))
            }
            GasPriceStrategy::Eip1559 => {
                let (max_fee, priority_fee) = self.estimate_eip1559_fees().await?;
                Ok(GasPrice::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: priority_fee,
                })
            }
        }
    }

    /// Estimate EIP-1559 fees
    async fn estimate_eip1559_fees(&self) -> RelayerResult<(U256, U256)> {
        let block = self
            .http()
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| self.connection_error(e.to_string()))?
            .ok_or_else(|| self.connection_error("No latest block"))?;

        let base_fee = block
            .base_fee_per_gas
            .ok_or_else(|| self.connection_error("No base fee in block"))?;

        let priority_fee = U256::from(2_000_000_000u64); // 2 gwei

        // Max fee = 2 * base_fee + priority_fee (buffer for block variability)
        let max_fee = base_fee * 2 + priority_fee;

        Ok((std::cmp::min(max_fee, self.max_gas_price()), priority_fee))
    }

    /// Configured gas price ceiling in wei
    pub fn max_gas_price(&self) -> U256 {
        U256::from(self.config.max_gas_price_gwei) * U256::from(1_000_000_000u64)
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.config.name, e);
                false
            }
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    pub fn config(&self) -> &EvmChainConfig {
        &self.config
    }
}

/// Gas price types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}
