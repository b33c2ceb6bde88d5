//! Outbound notification sinks

use crate::embed::Embed;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("webhook answered {0}")]
    Status(reqwest::StatusCode),

    #[error("{0}")]
    Other(String),
}

/// Destination for formatted embeds
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn deliver(&self, embed: &Embed) -> Result<(), SinkError>;
}

/// Posts embeds to a Discord-compatible webhook
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookSink {
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ReportSink for WebhookSink {
    async fn deliver(&self, embed: &Embed) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&embed.payload())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status));
        }

        debug!("Delivered '{}' embed ({})", embed.title, status);
        Ok(())
    }
}
