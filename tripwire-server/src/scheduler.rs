//! Reporting cycle scheduler

use crate::archive::Archiver;
use crate::reporter::{Delivery, Reporter};
use crate::sink::{ReportSink, WebhookSink};
use crate::stats::{persist_snapshot, StatsStore};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info};
use tripwire_common::{Cadence, Snapshot, TripwireConfig};

/// Everything one cycle needs, read from the configuration when the cycle
/// fires so reloads made during the wait already apply
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub cadence: Cadence,
    pub state_file: PathBuf,
    pub archive_dir: PathBuf,
    pub reporter: Reporter,
}

impl CycleSettings {
    pub fn from_config(config: &TripwireConfig) -> Self {
        Self {
            cadence: config.stats.cadence,
            state_file: config.stats.state_file.clone(),
            archive_dir: config.stats.archive_dir.clone(),
            reporter: Reporter::from_config(&config.report, config.stats.top_n),
        }
    }
}

/// What happened during one cycle
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub snapshot: Snapshot,
    pub archived: Option<PathBuf>,
    pub delivery: Delivery,
}

/// Drives the persist, archive, report, reset rollover forever
pub struct CycleScheduler {
    store: Arc<StatsStore>,
    config: Arc<RwLock<TripwireConfig>>,
    client: reqwest::Client,
}

impl CycleScheduler {
    pub fn new(
        store: Arc<StatsStore>,
        config: Arc<RwLock<TripwireConfig>>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            store,
            config,
            client,
        }
    }

    /// Wait for each boundary and run its cycle. Never returns.
    pub async fn run(self) {
        let mut last_boundary: Option<DateTime<Utc>> = None;

        loop {
            let cadence = self.config.read().await.stats.cadence;
            let (boundary, wait) = next_wake(cadence, Utc::now(), last_boundary);
            debug!(
                "Next statistics rollover at {} (in {}s)",
                boundary.to_rfc3339(),
                wait.as_secs()
            );

            tokio::time::sleep(wait).await;

            self.cycle_at(boundary, cadence).await;
            last_boundary = Some(boundary);
        }
    }

    /// Run the cycle for `boundary` with the configuration as it is now
    async fn cycle_at(&self, boundary: DateTime<Utc>, cadence: Cadence) -> CycleOutcome {
        let (mut settings, sink) = self.current_settings().await;
        // the archive name follows the cadence that produced the boundary
        settings.cadence = cadence;
        let sink = sink.as_ref().map(|s| s as &dyn ReportSink);
        run_cycle(&self.store, &settings, sink, boundary).await
    }

    async fn current_settings(&self) -> (CycleSettings, Option<WebhookSink>) {
        let config = self.config.read().await;
        let sink = config.report.webhook_url.as_ref().map(|url| {
            WebhookSink::new(
                self.client.clone(),
                url.clone(),
                Duration::from_secs(config.report.timeout_secs),
            )
        });
        (CycleSettings::from_config(&config), sink)
    }
}

/// Next boundary to fire and how long to sleep until it
///
/// The boundary is computed from `max(now, last)` so a clock that stepped
/// backwards, or a wake-up slightly before the boundary, never repeats the
/// previous cycle.
pub fn next_wake(
    cadence: Cadence,
    now: DateTime<Utc>,
    last: Option<DateTime<Utc>>,
) -> (DateTime<Utc>, Duration) {
    let from = last.map_or(now, |last| now.max(last));
    let boundary = cadence.next_boundary(from);
    let wait = (boundary - now).to_std().unwrap_or(Duration::ZERO);
    (boundary, wait)
}

/// Run one rollover for the cycle ending at `boundary`
///
/// Each step runs even when an earlier one failed, except the archive, which
/// needs this cycle's persist to have succeeded. The reset is guaranteed and
/// happens first so nothing recorded meanwhile is lost.
pub async fn run_cycle(
    store: &StatsStore,
    settings: &CycleSettings,
    sink: Option<&dyn ReportSink>,
    boundary: DateTime<Utc>,
) -> CycleOutcome {
    let snapshot = store.rollover().await;
    info!(
        "Rolling over statistics at {} ({} requests)",
        boundary.to_rfc3339(),
        snapshot.total_requests
    );

    // the archive copies the state file, so it is only valid if this
    // cycle's snapshot actually landed there
    let archived = match persist_snapshot(&snapshot, &settings.state_file).await {
        Ok(()) => {
            let archiver = Archiver::new(settings.archive_dir.clone(), settings.cadence);
            match archiver.store(&settings.state_file, boundary).await {
                Ok(path) => Some(path),
                Err(e) => {
                    error!("Failed to archive statistics: {}", e);
                    None
                }
            }
        }
        Err(e) => {
            error!("Failed to persist cycle statistics, skipping archive: {}", e);
            None
        }
    };

    let delivery = settings.reporter.send(&snapshot, sink, Utc::now()).await;

    if let Err(e) = store.persist(&settings.state_file).await {
        error!("Failed to persist fresh statistics: {}", e);
    }

    CycleOutcome {
        snapshot,
        archived,
        delivery,
    }
}
