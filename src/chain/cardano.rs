//! Destination chain adapter for Cardano
//!
//! Escrow events come from an indexer that watches the destination escrow script
//! and reports them by slot and event index. Transactions are signed by the remote
//! signer and submitted as CBOR to a Blockfrost-compatible endpoint.

use super::{ChainAdapter, TxRef};
use crate::config::CardanoChainConfig;
use crate::coordination::machine::SwapAction;
use crate::coordination::unix_now;
use crate::error::{RelayerError, RelayerResult, SubmitError};
use crate::events::{BlockRef, EscrowEvent, EventBatch, EventKind};
use crate::swap::{ChainSide, Secret, SwapId, SwapOrder};
use crate::tx::RemoteSigner;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Debug, Deserialize)]
struct IndexerPage {
    events: Vec<IndexerEvent>,
    tip_slot: u64,
}

#[derive(Debug, Deserialize)]
struct IndexerEvent {
    swap_id: String,
    kind: String,
    #[serde(default)]
    secret: Option<String>,
    slot: u64,
    index: u32,
}

impl IndexerEvent {
    fn into_event(self, observed_at: u64) -> RelayerResult<EscrowEvent> {
        let secret = self.secret.as_deref().map(str::parse::<Secret>).transpose()?;
        let kind = match self.kind.as_str() {
            "created" => EventKind::Created,
            "funded" => EventKind::Funded,
            "secret_revealed" => EventKind::SecretRevealed {
                secret: secret.ok_or_else(|| {
                    RelayerError::EventDecoding("secret_revealed event without secret".into())
                })?,
            },
            "claimed" => EventKind::Claimed { secret },
            "refunded" => EventKind::Refunded,
            "expired" => EventKind::Expired,
            other => {
                return Err(RelayerError::EventDecoding(format!(
                    "unknown escrow event kind: {}",
                    other
                )))
            }
        };

        Ok(EscrowEvent {
            side: ChainSide::Dest,
            swap_id: self.swap_id.parse::<SwapId>()?,
            kind,
            observed_at,
            block_ref: BlockRef::new(self.slot, self.index),
        })
    }
}

/// Escrow adapter for the destination chain
pub struct CardanoAdapter {
    config: CardanoChainConfig,
    client: reqwest::Client,
    signer: RemoteSigner,
}

impl CardanoAdapter {
    pub fn new(config: CardanoChainConfig, signer: RemoteSigner) -> RelayerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| RelayerError::ChainConnection {
                chain: config.name.clone(),
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        info!(
            "Cardano adapter for {} watching script {}",
            config.name, config.escrow_dst_address
        );

        Ok(Self {
            config,
            client,
            signer,
        })
    }

    fn connection_error(&self, message: impl Into<String>) -> RelayerError {
        RelayerError::ChainConnection {
            chain: self.config.name.clone(),
            message: message.into(),
        }
    }

    async fn fetch_page(&self, since: Option<BlockRef>) -> RelayerResult<IndexerPage> {
        let mut query = vec![
            ("script", self.config.escrow_dst_address.clone()),
            ("limit", self.config.page_size.to_string()),
        ];
        if let Some(cursor) = since {
            query.push(("from_slot", cursor.height.to_string()));
            query.push(("from_index", cursor.index.to_string()));
        }

        let response = self
            .client
            .get(format!("{}/escrows/events", base(&self.config.indexer_url)))
            .query(&query)
            .send()
            .await
            .map_err(|e| self.connection_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(self.connection_error(format!("indexer returned {}", response.status())));
        }

        response
            .json()
            .await
            .map_err(|e| RelayerError::EventDecoding(format!("malformed indexer page: {}", e)))
    }

    async fn submit_cbor(&self, cbor: Vec<u8>) -> Result<String, SubmitError> {
        let mut request = self
            .client
            .post(format!("{}/tx/submit", base(&self.config.submit_url)))
            .header(CONTENT_TYPE, "application/cbor")
            .body(cbor);
        if let Some(project_id) = self.config.project_id.as_deref().filter(|id| !id.is_empty()) {
            request = request.header("project_id", project_id);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SubmitError::Network(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SubmitError::Network(e.to_string()))?;

        if status.is_success() {
            Ok(body.trim().trim_matches('"').to_string())
        } else {
            Err(classify_submit_failure(status, &body))
        }
    }
}

fn base(url: &str) -> &str {
    url.trim_end_matches('/')
}

/// Decide the batch cursor for a page of events
fn page_cursor(
    events: &[EscrowEvent],
    page_full: bool,
    confirmed_slot: u64,
) -> Option<BlockRef> {
    if page_full {
        // More events may follow in the same slot
        events.last().map(|e| e.block_ref)
    } else {
        Some(BlockRef::end_of(confirmed_slot))
    }
}

/// Map a rejected submission onto the submission taxonomy
fn classify_submit_failure(status: StatusCode, body: &str) -> SubmitError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return SubmitError::Network(format!("submit API returned {}: {}", status, body));
    }

    if body.contains("BadInputsUTxO") {
        // The escrow UTxO is already spent
        SubmitError::AlreadySettled
    } else if body.contains("ValueNotConservedUTxO") || body.contains("FeeTooSmallUTxO") {
        SubmitError::InsufficientFunds(body.to_string())
    } else if body.contains("ScriptFailure")
        || body.contains("MissingVKeyWitnesses")
        || status == StatusCode::FORBIDDEN
        || status == StatusCode::UNAUTHORIZED
    {
        SubmitError::NotAuthorized(body.to_string())
    } else {
        SubmitError::NotAuthorized(format!("submit API returned {}: {}", status, body))
    }
}

#[async_trait]
impl ChainAdapter for CardanoAdapter {
    fn side(&self) -> ChainSide {
        ChainSide::Dest
    }

    async fn poll_events(&self, since: Option<BlockRef>) -> RelayerResult<EventBatch> {
        let page = self.fetch_page(since).await?;
        let confirmed_slot = page.tip_slot.saturating_sub(self.config.min_confirmations);
        let page_full = page.events.len() >= self.config.page_size as usize;
        let observed_at = unix_now();

        let mut events = Vec::with_capacity(page.events.len());
        for raw in page.events {
            if raw.slot > confirmed_slot {
                continue;
            }
            let event = raw.into_event(observed_at)?;
            if since.map_or(true, |cursor| event.block_ref > cursor) {
                events.push(event);
            }
        }
        events.sort_by_key(|e| e.block_ref);

        let cursor = page_cursor(&events, page_full, confirmed_slot);
        if let (Some(next), Some(prev)) = (cursor, since) {
            if next <= prev {
                return Ok(EventBatch::default());
            }
        }

        debug!(
            "Chain {}: {} events up to slot {}",
            self.config.name,
            events.len(),
            confirmed_slot
        );
        Ok(EventBatch { events, cursor })
    }

    async fn submit_action(
        &self,
        order: &SwapOrder,
        action: &SwapAction,
    ) -> Result<TxRef, SubmitError> {
        let cbor = self
            .signer
            .sign(&self.config.escrow_dst_address, order, action)
            .await?;
        let tx_id = self.submit_cbor(cbor).await?;
        Ok(TxRef(tx_id))
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/health", base(&self.config.indexer_url));
        match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                error!(
                    "Health check failed for chain {}: indexer returned {}",
                    self.config.name,
                    response.status()
                );
                false
            }
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.config.name, e);
                false
            }
        }
    }
}
