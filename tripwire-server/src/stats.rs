//! Server statistics store

use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use tripwire_common::{Observation, Snapshot, TableName};

/// Errors raised while persisting statistics
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("failed to serialize statistics: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Process-wide request counters for the running cycle
///
/// Every mutation happens under one write lock, so a `record` is either
/// entirely before or entirely after any `snapshot`/`reset`.
#[derive(Debug, Default)]
pub struct StatsStore {
    state: RwLock<Snapshot>,
}

impl StatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
        }
    }

    /// Rehydrate from a persisted snapshot
    ///
    /// A missing, unreadable or malformed file yields an empty store.
    pub async fn load(path: &Path) -> Self {
        let content = match tokio::fs::read(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No persisted statistics at {}", path.display());
                return Self::new();
            }
            Err(e) => {
                warn!("Failed to read statistics from {}: {}", path.display(), e);
                return Self::new();
            }
        };

        match serde_json::from_slice::<Snapshot>(&content) {
            Ok(snapshot) if snapshot.is_consistent() => {
                info!(
                    "Restored {} requests from {}",
                    snapshot.total_requests,
                    path.display()
                );
                Self::from_snapshot(snapshot)
            }
            Ok(_) => {
                warn!(
                    "Statistics in {} do not add up, starting empty",
                    path.display()
                );
                Self::new()
            }
            Err(e) => {
                warn!(
                    "Corrupt statistics in {}, starting empty: {}",
                    path.display(),
                    e
                );
                Self::new()
            }
        }
    }

    /// Count one request in the total and in all six tables
    pub async fn record(&self, obs: &Observation) {
        let mut state = self.state.write().await;
        state.record(obs);
    }

    /// Independent copy of the current counters
    pub async fn snapshot(&self) -> Snapshot {
        self.state.read().await.clone()
    }

    /// Drop all counters
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        *state = Snapshot::default();
    }

    /// Take the current counters and reset in one step
    pub async fn rollover(&self) -> Snapshot {
        let mut state = self.state.write().await;
        std::mem::take(&mut *state)
    }

    pub async fn total_requests(&self) -> u64 {
        self.state.read().await.total_requests
    }

    /// Highest-count entries of one table
    pub async fn top(&self, table: TableName, n: usize) -> Vec<(String, u64)> {
        self.state.read().await.top(table, n)
    }

    /// Write the current counters to `path`
    pub async fn persist(&self, path: &Path) -> Result<(), StatsError> {
        let snapshot = self.snapshot().await;
        persist_snapshot(&snapshot, path).await
    }
}

/// Atomically replace `path` with the serialized snapshot
///
/// The data goes to a sibling temp file first and is renamed into place, so
/// readers never see a partial write.
pub async fn persist_snapshot(snapshot: &Snapshot, path: &Path) -> Result<(), StatsError> {
    let content = serde_json::to_vec_pretty(snapshot)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| StatsError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, content)
        .await
        .map_err(|source| StatsError::Write {
            path: tmp.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| StatsError::Write {
            path: path.to_path_buf(),
            source,
        })?;

    debug!(
        "Persisted {} requests to {}",
        snapshot.total_requests,
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn obs(method: &str) -> Observation {
        Observation {
            method: method.to_string(),
            path: "/wp-login.php".to_string(),
            client_ip: "203.0.113.7".to_string(),
            country: "DE".to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            status: 200,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_records_are_all_counted() {
        let store = Arc::new(StatsStore::new());
        let mut handles = Vec::new();

        for i in 0..500 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let method = if i % 2 == 0 { "GET" } else { "POST" };
                store.record(&obs(method)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.total_requests, 500);
        assert_eq!(snapshot.counters.methods.total(), 500);
        assert_eq!(snapshot.counters.methods.get("GET"), 250);
        assert!(snapshot.is_consistent());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rollover_loses_nothing_under_load() {
        let store = Arc::new(StatsStore::new());
        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..1000 {
                    store.record(&obs("GET")).await;
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut taken = 0;
        for _ in 0..20 {
            let snapshot = store.rollover().await;
            assert!(snapshot.is_consistent());
            taken += snapshot.total_requests;
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
        taken += store.rollover().await.total_requests;

        assert_eq!(taken, 1000);
    }

    #[tokio::test]
    async fn test_reset_then_snapshot_is_empty() {
        let store = StatsStore::new();
        store.record(&obs("GET")).await;
        store.reset().await;

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot, Snapshot::default());
        assert_eq!(store.total_requests().await, 0);
    }

    #[tokio::test]
    async fn test_top_reads_named_table() {
        let store = StatsStore::new();
        for method in ["HEAD", "GET", "POST", "GET"] {
            store.record(&obs(method)).await;
        }

        let top = store.top(TableName::Methods, 2).await;
        assert_eq!(top, vec![("GET".to_string(), 2), ("HEAD".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_persist_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("stats.json");

        let store = StatsStore::new();
        for method in ["GET", "GET", "OPTIONS"] {
            store.record(&obs(method)).await;
        }
        store.persist(&path).await.unwrap();
        // persisting twice is harmless
        store.persist(&path).await.unwrap();

        let restored = StatsStore::load(&path).await;
        assert_eq!(restored.snapshot().await, store.snapshot().await);
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatsStore::load(&dir.path().join("absent.json")).await;
        assert_eq!(store.total_requests().await, 0);
    }

    #[tokio::test]
    async fn test_load_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();

        let garbage = dir.path().join("garbage.json");
        std::fs::write(&garbage, b"{not json").unwrap();
        assert_eq!(StatsStore::load(&garbage).await.total_requests().await, 0);

        let wrong_shape = dir.path().join("wrong.json");
        std::fs::write(&wrong_shape, br#"{"total_requests": 2, "methods": ["GET"]}"#).unwrap();
        assert_eq!(StatsStore::load(&wrong_shape).await.total_requests().await, 0);

        let inconsistent = dir.path().join("inconsistent.json");
        std::fs::write(&inconsistent, br#"{"total_requests": 9, "methods": {"GET": 1}}"#)
            .unwrap();
        assert_eq!(StatsStore::load(&inconsistent).await.total_requests().await, 0);
    }
}
