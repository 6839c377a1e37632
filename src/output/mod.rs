//! Durable crawl output
//!
//! This module handles:
//! - The append-only record log and its replay on startup
//! - Content-addressed image artifacts
//! - The status file read by the monitoring console
//! - Statistics printed by `--stats`
//!
//! [`PersistenceWriter`] is the only thing that writes the record log.

mod artifacts;
mod record_log;
pub mod stats;
mod status;

pub use artifacts::ArtifactStore;
pub use record_log::{RecordLog, Replay};
pub use stats::{load_statistics, print_statistics, CrawlStatistics};
pub use status::{spawn_status_writer, write_status};

use crate::extract::{CandidateRecord, ExtractedRecord, ImageArtifact};
use crate::state::HealthReporter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// The record log or artifact store could not be written
///
/// Fatal: the crawl stops rather than risk losing admitted records.
#[derive(Debug, Error)]
pub enum DurabilityError {
    #[error("I/O failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Record log {} is unusable after an earlier write failure", .0.display())]
    Poisoned(PathBuf),
}

impl DurabilityError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Writes admitted records and their artifacts
pub struct PersistenceWriter {
    log: RecordLog,
    artifacts: ArtifactStore,
    health: Arc<HealthReporter>,
}

impl PersistenceWriter {
    /// Opens the record log and artifact directory
    ///
    /// # Returns
    ///
    /// * `Ok((PersistenceWriter, Replay))` - Ready writer and the replayed log
    /// * `Err(DurabilityError)` - Either location could not be opened
    pub fn open(
        log_path: &Path,
        artifact_dir: &Path,
        health: Arc<HealthReporter>,
    ) -> Result<(Self, Replay), DurabilityError> {
        let (log, replay) = RecordLog::open(log_path)?;
        let artifacts = ArtifactStore::open(artifact_dir)?;
        Ok((
            Self {
                log,
                artifacts,
                health,
            },
            replay,
        ))
    }

    /// Appends one record line
    pub fn append(&self, record: &ExtractedRecord) -> Result<(), DurabilityError> {
        self.log.append(record)?;
        self.health.record_admitted();
        Ok(())
    }

    /// Stores one artifact; returns whether it was newly written
    pub fn store_artifact(&self, artifact: &ImageArtifact) -> Result<bool, DurabilityError> {
        let written = self.artifacts.store(artifact)?;
        if written {
            self.health.artifact_stored();
        }
        Ok(written)
    }

    /// Persists an admitted candidate
    ///
    /// Artifacts go first so a record in the log never names a missing file.
    pub fn persist(&self, candidate: &CandidateRecord) -> Result<(), DurabilityError> {
        for artifact in &candidate.artifacts {
            self.store_artifact(artifact)?;
        }
        self.append(&candidate.record)
    }

    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    pub fn artifact_dir(&self) -> &Path {
        self.artifacts.dir()
    }
}
