//! Configuration live reload using file watcher

use crate::AppState;
use anyhow::Result;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tripwire_common::TripwireConfig;

/// Watch configuration file for changes and reload automatically
pub async fn watch_config(state: Arc<AppState>) -> Result<()> {
    let config_path = state.config_path.clone();

    if !config_path.exists() {
        warn!("Config file does not exist, skipping file watcher");
        return Ok(());
    }

    let config_name = config_path
        .file_name()
        .map(OsStr::to_os_string)
        .ok_or_else(|| anyhow::anyhow!("config path has no file name"))?;

    let (tx, mut rx) = mpsc::channel(100);

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                if touches_config(&event, &config_name) {
                    let _ = tx.blocking_send(());
                }
            }
        },
        Config::default(),
    )?;

    // Watch the parent directory so editors that replace the file are seen
    let watch_path = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    watcher.watch(watch_path, RecursiveMode::NonRecursive)?;

    info!("Watching {} for changes", config_path.display());

    let mut last_reload = std::time::Instant::now();
    let debounce_duration = std::time::Duration::from_millis(500);

    while rx.recv().await.is_some() {
        let now = std::time::Instant::now();
        if now.duration_since(last_reload) < debounce_duration {
            continue;
        }
        last_reload = now;

        // Let the writer finish before reading
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        match reload_config(&state).await {
            Ok(()) => info!("Configuration reloaded, changes apply from the next cycle"),
            Err(e) => error!("Failed to reload configuration: {}", e),
        }
    }

    Ok(())
}

/// Whether `event` modifies or creates the config file
///
/// The parent directory is watched, so writes to the state file or log file
/// living next to the config must not count.
fn touches_config(event: &Event, config_name: &OsStr) -> bool {
    (event.kind.is_modify() || event.kind.is_create())
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(config_name))
}

/// Read, override and validate the configuration at `path`
pub fn load_config(path: &Path) -> Result<TripwireConfig> {
    let mut config = TripwireConfig::load(path)?;
    config.apply_env();
    config.validate()?;
    Ok(config)
}

/// Reload configuration from file
pub async fn reload_config(state: &Arc<AppState>) -> Result<()> {
    let new_config = load_config(&state.config_path)?;

    let mut config = state.config.write().await;
    if config.server.port != new_config.server.port
        || config.server.bind_address != new_config.server.bind_address
    {
        warn!("Listener address changes need a restart to take effect");
    }
    *config = new_config;

    Ok(())
}
