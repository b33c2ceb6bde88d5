//! Per-request detail logging and webhook notifications

use crate::embed::{escape, Embed};
use crate::sink::{ReportSink, WebhookSink};
use chrono::Utc;
use std::time::Duration;
use tracing::{info, warn};

const DETAIL_TITLE: &str = "Honeypot Log";
const DETAIL_COLOR: u32 = 0x3498db;

/// Raw facts about one request, richer than the aggregated observation
#[derive(Debug, Clone)]
pub struct RequestDetail {
    pub method: String,
    pub url: String,
    pub client: String,
    pub status: u16,
    pub user_agent: String,
    pub content_length: Option<u64>,
    pub headers: Vec<(String, String)>,
    /// Lossy UTF-8 of the request body, possibly cut short
    pub body: String,
    pub process_time: Duration,
}

impl RequestDetail {
    pub fn to_embed(&self) -> Embed {
        let headers = self
            .headers
            .iter()
            .map(|(name, value)| format!("{}: {}", escape(name), escape(value)))
            .collect::<Vec<_>>()
            .join("\n");

        Embed::new(DETAIL_TITLE, DETAIL_COLOR, Utc::now())
            .field("request_method", escape(&self.method))
            .field("request_url", escape(&self.url))
            .field("client_host", escape(&self.client))
            .field("response_status", self.status.to_string())
            .field("user_agent", escape(&self.user_agent))
            .field(
                "request_size",
                self.content_length
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            )
            .field("request_headers", headers)
            .field("request_body", escape(&self.body))
            .field(
                "process_time",
                format!("{:.3}ms", self.process_time.as_secs_f64() * 1000.0),
            )
    }
}

/// Fans request details out to the log and an optional webhook
///
/// Webhook posts run on their own task so a slow sink never holds up the
/// request that produced them.
#[derive(Debug, Clone)]
pub struct Notifier {
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn dispatch(&self, detail: RequestDetail, webhook_url: Option<&str>, timeout: Duration) {
        info!(
            target: "tripwire::access",
            method = %detail.method,
            url = %detail.url,
            client = %detail.client,
            status = detail.status,
            user_agent = %detail.user_agent,
            content_length = ?detail.content_length,
            body_len = detail.body.len(),
            process_time_ms = detail.process_time.as_secs_f64() * 1000.0,
            "request"
        );

        let Some(url) = webhook_url else {
            return;
        };

        let sink = WebhookSink::new(self.client.clone(), url, timeout);
        tokio::spawn(async move {
            if let Err(e) = sink.deliver(&detail.to_embed()).await {
                warn!("Failed to send request detail to webhook: {}", e);
            }
        });
    }
}
