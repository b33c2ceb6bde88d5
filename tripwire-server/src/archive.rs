//! Per-cycle snapshot archive

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::info;
use tripwire_common::Cadence;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to create archive directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Copies the persisted snapshot into a directory of per-cycle files
#[derive(Debug, Clone)]
pub struct Archiver {
    dir: PathBuf,
    cadence: Cadence,
}

impl Archiver {
    pub fn new(dir: impl Into<PathBuf>, cadence: Cadence) -> Self {
        Self {
            dir: dir.into(),
            cadence,
        }
    }

    /// Where the cycle ending at `boundary` is archived
    pub fn path_for(&self, boundary: DateTime<Utc>) -> PathBuf {
        self.dir.join(self.cadence.archive_name(boundary))
    }

    /// Copy `source` into the archive under the name for `boundary`
    ///
    /// The directory is created on first use. An existing entry for the same
    /// boundary is overwritten.
    pub async fn store(
        &self,
        source: &Path,
        boundary: DateTime<Utc>,
    ) -> Result<PathBuf, ArchiveError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| ArchiveError::CreateDir {
                path: self.dir.clone(),
                source,
            })?;

        let target = self.path_for(boundary);
        tokio::fs::copy(source, &target)
            .await
            .map_err(|e| ArchiveError::Copy {
                from: source.to_path_buf(),
                to: target.clone(),
                source: e,
            })?;

        info!("Archived statistics to {}", target.display());
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_store_creates_dir_and_names_by_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("stats.json");
        std::fs::write(&source, br#"{"total_requests":0}"#).unwrap();

        let archiver = Archiver::new(dir.path().join("archive"), Cadence::Debug);
        let boundary = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap();
        let stored = archiver.store(&source, boundary).await.unwrap();

        assert_eq!(stored, dir.path().join("archive").join("20240101T0001Z.json"));
        assert_eq!(
            std::fs::read_to_string(&stored).unwrap(),
            r#"{"total_requests":0}"#
        );
    }

    #[tokio::test]
    async fn test_same_boundary_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("stats.json");
        let archiver = Archiver::new(dir.path().join("archive"), Cadence::Production);
        let boundary = Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap();

        std::fs::write(&source, "first").unwrap();
        archiver.store(&source, boundary).await.unwrap();
        std::fs::write(&source, "second").unwrap();
        let stored = archiver.store(&source, boundary).await.unwrap();

        let entries = std::fs::read_dir(dir.path().join("archive")).unwrap().count();
        assert_eq!(entries, 1);
        assert_eq!(std::fs::read_to_string(stored).unwrap(), "second");
    }

    #[tokio::test]
    async fn test_missing_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let archiver = Archiver::new(dir.path().join("archive"), Cadence::Debug);
        let result = archiver
            .store(&dir.path().join("nope.json"), Utc::now())
            .await;
        assert!(matches!(result, Err(ArchiveError::Copy { .. })));
    }
}
