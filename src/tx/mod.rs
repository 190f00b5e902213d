//! Transaction submission with nonce management, gas pricing and signing

mod gas;
mod nonce;
mod sender;
mod signer;

pub use gas::GasEstimator;
pub use nonce::NonceManager;
pub use sender::{classify_send_error, TransactionSender};
pub use signer::{load_wallet, RemoteSigner};
