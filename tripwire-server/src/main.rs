//! Tripwire - HTTP honeypot sensor with periodic traffic summaries

mod archive;
mod embed;
mod logging;
mod notifier;
mod reload;
mod reporter;
mod scheduler;
mod server;
mod sink;
mod stats;

use anyhow::Result;
use notifier::Notifier;
use scheduler::CycleScheduler;
use stats::StatsStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};
use tripwire_common::TripwireConfig;

/// Shared application state
pub struct AppState {
    pub config: Arc<RwLock<TripwireConfig>>,
    pub stats: Arc<StatsStore>,
    pub notifier: Notifier,
    pub config_path: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Determine config path
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("tripwire.toml"));

    // Load or create default configuration
    let (config, created) = if config_path.exists() {
        (reload::load_config(&config_path)?, false)
    } else {
        let mut config = TripwireConfig::default();
        config.apply_env();
        config.validate()?;
        (config, true)
    };

    // Logging needs the configured file, so it starts after the config
    let _log_guard = logging::init_logging(config.notify.log_file.as_deref())?;

    info!("Starting Tripwire v{}", env!("CARGO_PKG_VERSION"));
    if created {
        info!("No configuration file found, using defaults");
        // Save default config for reference, without env-provided secrets
        if let Err(e) = TripwireConfig::default().save(&config_path) {
            error!("Failed to save default config: {}", e);
        }
    } else {
        info!("Loaded configuration from {}", config_path.display());
    }
    info!(
        "Statistics roll over on the {:?} cadence, reporting {}",
        config.stats.cadence,
        if config.report.webhook_url.is_some() {
            "enabled"
        } else {
            "disabled"
        }
    );

    let stats = Arc::new(StatsStore::load(&config.stats.state_file).await);
    let client = reqwest::Client::builder().build()?;

    // Create shared state
    let state = Arc::new(AppState {
        config: Arc::new(RwLock::new(config)),
        stats: stats.clone(),
        notifier: Notifier::new(client.clone()),
        config_path: config_path.clone(),
    });

    // Start file watcher for live reloading
    let reload_state = state.clone();
    let reload_handle = tokio::spawn(async move {
        if let Err(e) = reload::watch_config(reload_state).await {
            error!("Config watcher error: {}", e);
        }
    });

    // Start the reporting cycle
    let scheduler = CycleScheduler::new(stats, state.config.clone(), client);
    let scheduler_handle = tokio::spawn(scheduler.run());

    // Start HTTP server
    let server_state = state.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::run_server(server_state).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            if let Err(e) = result {
                error!("Server task failed: {}", e);
            }
        }
    }

    // Cleanup
    reload_handle.abort();
    scheduler_handle.abort();
    // the scheduler may be mid-persist; let it unwind before the final write.
    // An abort between its rollover and its first persist drops that cycle's
    // snapshot: shutdown only keeps what the last completed persist captured.
    let _ = scheduler_handle.await;

    let state_file = state.config.read().await.stats.state_file.clone();
    if let Err(e) = state.stats.persist(&state_file).await {
        error!("Failed to persist statistics on shutdown: {}", e);
    }

    info!("Tripwire shutdown complete");
    Ok(())
}
