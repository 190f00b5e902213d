//! Gas limit and price buffering for escrow transactions

use crate::chain::{EvmProvider, GasPrice};
use crate::error::RelayerResult;

use ethers::types::U256;
use tracing::debug;

/// Gas estimator for transactions
pub struct GasEstimator {
    /// Buffer percentage for gas limit (e.g., 20 = 20% buffer)
    gas_limit_buffer_percent: u64,
    /// Buffer percentage for gas price
    gas_price_buffer_percent: u64,
}

impl GasEstimator {
    /// Create a new gas estimator
    pub fn new() -> Self {
        Self {
            gas_limit_buffer_percent: 20,
            gas_price_buffer_percent: 10,
        }
    }

    /// Add the limit buffer to a node's estimate
    pub fn buffered_gas_limit(&self, estimate: U256) -> U256 {
        estimate + estimate * self.gas_limit_buffer_percent / 100
    }

    /// Get buffered gas price for the chain, capped at the configured ceiling
    pub async fn get_gas_price(&self, provider: &EvmProvider) -> RelayerResult<GasPrice> {
        let gas_price = provider.get_gas_price().await?;
        let buffered = self.apply_price_buffer(gas_price, provider.max_gas_price());

        debug!("Gas price for chain {}: {:?}", provider.chain_id(), buffered);
        Ok(buffered)
    }

    fn apply_price_buffer(&self, gas_price: GasPrice, cap: U256) -> GasPrice {
        let pct = self.gas_price_buffer_percent;
        match gas_price {
            GasPrice::Legacy(price) => GasPrice::Legacy((price + price * pct / 100).min(cap)),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let max_fee_per_gas = (max_fee_per_gas + max_fee_per_gas * pct / 100).min(cap);
                let max_priority_fee_per_gas = (max_priority_fee_per_gas
                    + max_priority_fee_per_gas * pct / 100)
                    .min(max_fee_per_gas);
                GasPrice::Eip1559 {
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                }
            }
        }
    }

    /// Calculate total cost in wei
    pub fn calculate_cost(gas_limit: U256, gas_price: &GasPrice) -> U256 {
        match gas_price {
            GasPrice::Legacy(price) => gas_limit * *price,
            GasPrice::Eip1559 { max_fee_per_gas, .. } => gas_limit * *max_fee_per_gas,
        }
    }
}

impl Default for GasEstimator {
    fn default() -> Self {
        Self::new()
    }
}
