//! Configuration management for the swap relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relayer: RelayerConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub chains: ChainsConfig,
    pub wallet: WalletConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    pub instance_id: String,
    pub poll_interval_ms: u64,
    /// How often deadlines are checked
    pub tick_interval_ms: u64,
    /// Rejected submissions tolerated before falling back to a refund
    pub max_rejections: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// How long a submitted action may stay unconfirmed before it is resubmitted
    pub confirmation_timeout_secs: u64,
    pub health_check_interval_secs: u64,
}

impl RelayerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainsConfig {
    pub source: EvmChainConfig,
    pub destination: CardanoChainConfig,
}

/// Source chain (EVM)
#[derive(Debug, Clone, Deserialize)]
pub struct EvmChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub escrow_factory_address: String,
    pub escrow_src_address: String,
    pub confirmation_blocks: u64,
    pub gas_price_strategy: GasPriceStrategy,
    pub max_gas_price_gwei: u64,
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    /// Block to start from when no cursor is stored
    #[serde(default)]
    pub start_block: u64,
}

fn default_max_block_range() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
}

/// Destination chain (Cardano)
#[derive(Debug, Clone, Deserialize)]
pub struct CardanoChainConfig {
    pub name: String,
    /// Escrow indexer base URL
    pub indexer_url: String,
    /// Transaction submission base URL (Blockfrost-compatible)
    pub submit_url: String,
    #[serde(default)]
    pub project_id: Option<String>,
    /// Destination escrow script address
    pub escrow_dst_address: String,
    /// Remote signing service base URL
    pub signer_url: String,
    pub min_confirmations: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_page_size() -> u32 {
    500
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub keystore_path: Option<String>,
    pub keystore_password_env: Option<String>,
    pub private_key_env: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationConfig {
    pub webhook_url: Option<String>,
    #[serde(default = "default_webhook_retries")]
    pub webhook_retries: u32,
}

fn default_webhook_retries() -> u32 {
    3
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("SWAP_RELAYER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::from_path(&config_path)
    }

    /// Load and validate settings from a specific file
    pub fn from_path(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        let relayer = &self.relayer;
        if relayer.poll_interval_ms == 0 || relayer.tick_interval_ms == 0 {
            anyhow::bail!("Poll and tick intervals must be positive");
        }
        if relayer.retry_base_delay_ms == 0 || relayer.retry_base_delay_ms > relayer.retry_max_delay_ms
        {
            anyhow::bail!(
                "retry_base_delay_ms ({}) must be positive and not exceed retry_max_delay_ms ({})",
                relayer.retry_base_delay_ms,
                relayer.retry_max_delay_ms
            );
        }
        if relayer.max_rejections == 0 {
            anyhow::bail!("max_rejections must be at least 1");
        }

        let source = &self.chains.source;
        if source.rpc_urls.is_empty() {
            anyhow::bail!("Chain {} has no RPC URLs configured", source.name);
        }
        if source.escrow_factory_address.is_empty() || source.escrow_src_address.is_empty() {
            anyhow::bail!("Chain {} is missing escrow contract addresses", source.name);
        }
        if source.max_block_range == 0 {
            anyhow::bail!("Chain {} max_block_range must be positive", source.name);
        }

        let dest = &self.chains.destination;
        if dest.indexer_url.is_empty() || dest.submit_url.is_empty() || dest.signer_url.is_empty() {
            anyhow::bail!("Chain {} is missing service endpoints", dest.name);
        }
        if dest.escrow_dst_address.is_empty() {
            anyhow::bail!("Chain {} has no escrow script address", dest.name);
        }

        if self.wallet.private_key_env.is_none() && self.wallet.keystore_path.is_none() {
            tracing::warn!("No wallet configured - source chain submissions will fail");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");

    re.replace_all(input, |caps: &regex::Captures| {
        env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}
