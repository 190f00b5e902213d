//! Nonce management for the relayer wallet on the source chain
//!
//! Submissions run concurrently, so nonces are allocated locally and only
//! re-read from the chain on first use or after a nonce error.

use crate::chain::EvmProvider;
use crate::error::RelayerResult;

use ethers::types::Address;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Allocates nonces for one wallet on one chain
pub struct NonceManager {
    wallet_address: Address,
    /// Next nonce to hand out; `None` until synced
    next: Mutex<Option<u64>>,
}

impl NonceManager {
    pub fn new(wallet_address: Address) -> Self {
        Self {
            wallet_address,
            next: Mutex::new(None),
        }
    }

    /// Allocate the next nonce, syncing from the chain if needed
    pub async fn next_nonce(&self, provider: &EvmProvider) -> RelayerResult<u64> {
        let mut next = self.next.lock().await;
        let nonce = match *next {
            Some(nonce) => nonce,
            None => provider.get_transaction_count(self.wallet_address).await?,
        };
        *next = Some(nonce + 1);

        debug!("Allocated nonce {} for {:?}", nonce, self.wallet_address);
        Ok(nonce)
    }

    /// Hand a nonce back after a submission that never reached the mempool
    pub async fn release(&self, nonce: u64) {
        let mut next = self.next.lock().await;
        if *next == Some(nonce + 1) {
            *next = Some(nonce);
        } else {
            // Later nonces are already out; re-read from the chain next time
            *next = None;
        }
    }

    /// Forget the local nonce so the next allocation re-reads it
    pub async fn reset(&self) {
        warn!("Resetting local nonce for {:?}", self.wallet_address);
        *self.next.lock().await = None;
    }

    #[cfg(test)]
    async fn seed(&self, nonce: u64) {
        *self.next.lock().await = Some(nonce);
    }

    #[cfg(test)]
    async fn peek(&self) -> Option<u64> {
        *self.next.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_release_last_nonce_reuses_it() {
        let manager = NonceManager::new(Address::zero());
        manager.seed(7).await;

        manager.release(6).await;
        assert_eq!(manager.peek().await, Some(6));
    }

    #[tokio::test]
    async fn test_release_with_gap_forces_resync() {
        let manager = NonceManager::new(Address::zero());
        manager.seed(9).await;

        manager.release(6).await;
        assert_eq!(manager.peek().await, None);

        manager.seed(3).await;
        manager.reset().await;
        assert_eq!(manager.peek().await, None);
    }
}
