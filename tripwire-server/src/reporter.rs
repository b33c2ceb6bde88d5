//! Cycle summary formatting and delivery

use crate::embed::{escape, Embed};
use crate::sink::ReportSink;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use tripwire_common::{FrequencyTable, ReportConfig, Snapshot, TableName};

/// Outcome of a [`Reporter::send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// No sink configured
    Skipped,
    Failed,
}

/// Builds the per-cycle summary embed
#[derive(Debug, Clone)]
pub struct Reporter {
    title: String,
    color: u32,
    top_n: usize,
}

impl Reporter {
    pub fn new(title: impl Into<String>, color: u32, top_n: usize) -> Self {
        Self {
            title: title.into(),
            color,
            top_n,
        }
    }

    pub fn from_config(config: &ReportConfig, top_n: usize) -> Self {
        Self::new(config.title.clone(), config.color, top_n)
    }

    /// Format a snapshot. Every value coming from a request is escaped.
    pub fn build(&self, snapshot: &Snapshot, completed_at: DateTime<Utc>) -> Embed {
        let counters = &snapshot.counters;
        let ranked = |table| ranked_lines(&snapshot.top(table, self.top_n));

        Embed::new(self.title.clone(), self.color, completed_at)
            .field("Total Requests", snapshot.total_requests.to_string())
            .field("Unique IPs", counters.ips.len().to_string())
            .field("Unique Countries", counters.countries.len().to_string())
            .field("Top Countries", ranked(TableName::Countries))
            .field("Top IPs", ranked(TableName::Ips))
            .field("Top User Agents", ranked(TableName::UserAgents))
            .field("Top Paths", ranked(TableName::Paths))
            .field("Methods", distribution(&counters.methods))
            .field("Status Codes", distribution(&counters.status_codes))
    }

    /// Format and deliver; failures are logged and never retried
    pub async fn send(
        &self,
        snapshot: &Snapshot,
        sink: Option<&dyn ReportSink>,
        completed_at: DateTime<Utc>,
    ) -> Delivery {
        let Some(sink) = sink else {
            info!("No report webhook configured, skipping summary");
            return Delivery::Skipped;
        };

        let embed = self.build(snapshot, completed_at);
        match sink.deliver(&embed).await {
            Ok(()) => {
                info!(
                    "Sent summary for {} requests",
                    snapshot.total_requests
                );
                Delivery::Delivered
            }
            Err(e) => {
                warn!("Failed to send summary: {}", e);
                Delivery::Failed
            }
        }
    }
}

fn ranked_lines(entries: &[(String, u64)]) -> String {
    entries
        .iter()
        .enumerate()
        .map(|(i, (key, count))| format!("{}. {} ({})", i + 1, escape(key), count))
        .collect::<Vec<_>>()
        .join("\n")
}

fn distribution(table: &FrequencyTable) -> String {
    table
        .iter()
        .map(|(key, count)| format!("{}: {}", escape(key), count))
        .collect::<Vec<_>>()
        .join("\n")
}
