//! Atomic swap relayer
//!
//! Watches hashlock/timelock escrows on an EVM source chain and a Cardano
//! destination chain, and drives each matched swap to completion or refund.

pub mod api;
pub mod chain;
pub mod config;
pub mod coordination;
pub mod error;
pub mod events;
pub mod metrics;
pub mod notify;
pub mod store;
pub mod swap;
pub mod tx;

pub use error::{RelayerError, RelayerResult};
