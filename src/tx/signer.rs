//! Signing collaborators
//!
//! The source chain is signed by an ethers `Signer` loaded from the environment or
//! an encrypted keystore. Destination chain transactions are built and witnessed by
//! a remote signing service so no Cardano key material enters the relayer.

use crate::config::WalletConfig;
use crate::coordination::machine::SwapAction;
use crate::error::{RelayerError, RelayerResult, SubmitError};
use crate::swap::SwapOrder;

use ethers::signers::LocalWallet;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Load the source chain wallet from an env var or keystore
pub fn load_wallet(config: &WalletConfig) -> RelayerResult<LocalWallet> {
    if let Some(var) = &config.private_key_env {
        if let Ok(key) = std::env::var(var) {
            return key
                .trim()
                .trim_start_matches("0x")
                .parse::<LocalWallet>()
                .map_err(|e| RelayerError::Signer(format!("Invalid private key in {}: {}", var, e)));
        }
    }

    if let Some(path) = &config.keystore_path {
        let password_var = config
            .keystore_password_env
            .as_deref()
            .unwrap_or("RELAYER_KEYSTORE_PASSWORD");
        let password = std::env::var(password_var).map_err(|_| {
            RelayerError::Signer(format!("Keystore password variable {} is not set", password_var))
        })?;
        let wallet = LocalWallet::decrypt_keystore(path, password)
            .map_err(|e| RelayerError::Signer(format!("Failed to decrypt keystore {}: {}", path, e)))?;
        info!("Loaded wallet from keystore {}", path);
        return Ok(wallet);
    }

    Err(RelayerError::Signer(
        "No wallet configured. Set wallet.private_key_env or wallet.keystore_path".to_string(),
    ))
}

#[derive(Debug, Serialize)]
struct SignRequest<'a> {
    swap_id: String,
    script_address: &'a str,
    #[serde(flatten)]
    action: &'a SwapAction,
    maker: &'a str,
    taker: &'a str,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    /// Hex-encoded signed transaction CBOR
    tx_cbor: String,
}

/// Client for the remote transaction signing service
pub struct RemoteSigner {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteSigner {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> RelayerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RelayerError::Signer(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Ask the service for a signed transaction performing `action` on the escrow script
    pub async fn sign(
        &self,
        script_address: &str,
        order: &SwapOrder,
        action: &SwapAction,
    ) -> Result<Vec<u8>, SubmitError> {
        let leg = order.leg(action.side());
        let request = SignRequest {
            swap_id: order.swap_id.to_hex(),
            script_address,
            action,
            maker: &leg.maker,
            taker: &leg.taker,
            amount: leg.amount.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/sign", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| SubmitError::Network(format!("signer unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_signer_status(status, body));
        }

        let signed: SignResponse = response
            .json()
            .await
            .map_err(|e| SubmitError::Network(format!("malformed signer response: {}", e)))?;
        debug!("Signer returned {} hex chars of CBOR", signed.tx_cbor.len());

        hex::decode(signed.tx_cbor.trim_start_matches("0x"))
            .map_err(|e| SubmitError::Network(format!("signer returned invalid hex: {}", e)))
    }
}

fn classify_signer_status(status: StatusCode, body: String) -> SubmitError {
    match status {
        StatusCode::CONFLICT => SubmitError::AlreadySettled,
        StatusCode::PAYMENT_REQUIRED => SubmitError::InsufficientFunds(body),
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            SubmitError::Network(format!("signer returned {}: {}", s, body))
        }
        _ => SubmitError::NotAuthorized(format!("signer returned {}: {}", status, body)),
    }
}
