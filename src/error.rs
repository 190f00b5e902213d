//! Error types for the swap relayer

use thiserror::Error;

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Chain connection error on {chain}: {message}")]
    ChainConnection { chain: String, message: String },

    #[error("Event decoding error: {0}")]
    EventDecoding(String),

    #[error("Invalid swap order {swap_id}: {reason}")]
    InvalidOrder { swap_id: String, reason: String },

    #[error("Swap {swap_id} not found")]
    SwapNotFound { swap_id: String },

    #[error("Signer error: {0}")]
    Signer(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Coordinator is not running")]
    CoordinatorClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, RelayerError::ChainConnection { .. })
    }
}

impl From<serde_json::Error> for RelayerError {
    fn from(e: serde_json::Error) -> Self {
        RelayerError::Internal(format!("serialization: {}", e))
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;

/// Failure modes of an escrow action submission
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("insufficient funds to submit transaction: {0}")]
    InsufficientFunds(String),

    #[error("submitter not authorized: {0}")]
    NotAuthorized(String),

    #[error("escrow already settled")]
    AlreadySettled,

    #[error("network error: {0}")]
    Network(String),
}

impl SubmitError {
    /// Transient failures are retried with back-off and never fail the swap
    pub fn is_transient(&self) -> bool {
        matches!(self, SubmitError::Network(_))
    }

    /// Rejections count towards the bounded retry budget
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SubmitError::InsufficientFunds(_) | SubmitError::NotAuthorized(_)
        )
    }

    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            SubmitError::InsufficientFunds(_) => "insufficient_funds",
            SubmitError::NotAuthorized(_) => "not_authorized",
            SubmitError::AlreadySettled => "already_settled",
            SubmitError::Network(_) => "network",
        }
    }
}
