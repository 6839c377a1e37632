//! Periodic status file for the monitoring console
//!
//! The console only ever reads this file. It is replaced atomically, so a
//! reader sees either the previous snapshot or the next one.

use crate::state::{HealthReporter, HealthSnapshot};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Writes `snapshot` as pretty JSON to `path` via write-then-rename
pub fn write_status(path: &Path, snapshot: &HealthSnapshot) -> std::io::Result<()> {
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            std::fs::create_dir_all(parent)?;
            parent
        }
        None => Path::new("."),
    };

    let json = serde_json::to_vec_pretty(snapshot)?;
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(&json)?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Rewrites the status file every `interval` until `cancel` fires
///
/// A last snapshot is written on the way out so the file reflects the final
/// counters.
pub fn spawn_status_writer(
    path: PathBuf,
    interval: Duration,
    health: Arc<HealthReporter>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = write_status(&path, &health.snapshot()) {
                        tracing::warn!("Failed to write status file {}: {}", path.display(), e);
                    }
                }
            }
        }

        if let Err(e) = write_status(&path, &health.snapshot()) {
            tracing::warn!("Failed to write status file {}: {}", path.display(), e);
        }
    })
}
