//! Webhook notification sink.
//!
//! Posts phase transitions as JSON to a configured URL.

use super::{NotificationSink, PhaseTransition};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Sink that POSTs transitions to a webhook URL.
pub struct WebhookSink {
    client: Client,
    url: String,
    /// Number of retries on failure
    max_retries: u32,
    retry_delay: Duration,
}

impl WebhookSink {
    pub fn new(url: &str, max_retries: u32) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            client,
            url: url.to_string(),
            max_retries,
            retry_delay: Duration::from_secs(1),
        })
    }

    async fn post_once(&self, transition: &PhaseTransition) -> anyhow::Result<()> {
        let response = self.client.post(&self.url).json(transition).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "Webhook returned status {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            );
        }

        tracing::debug!("Posted transition of swap {} to webhook", transition.swap_id);
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deliver(&self, transition: &PhaseTransition) -> anyhow::Result<()> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tracing::warn!(
                    "Webhook retry {} for swap {}",
                    attempt,
                    transition.swap_id
                );
                tokio::time::sleep(self.retry_delay * attempt).await;
            }

            match self.post_once(transition).await {
                Ok(()) => return Ok(()),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Unknown webhook error")))
    }
}
