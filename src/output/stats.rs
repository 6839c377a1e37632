//! Statistics for `--stats`
//!
//! Combines run history and failures from the ledger with a read-only
//! replay of the record log.

use crate::output::{ArtifactStore, DurabilityError, RecordLog};
use crate::storage::{FailureEntry, Ledger, RunRecord, StorageError};
use std::path::Path;
use thiserror::Error;

/// Errors while gathering statistics
#[derive(Debug, Error)]
pub enum StatsError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Durability(#[from] DurabilityError),
}

/// Crawl statistics summary
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    /// Most recent runs first
    pub runs: Vec<RunRecord>,

    /// Permanent failures per reason
    pub failure_summary: Vec<(String, u64)>,

    pub recent_failures: Vec<FailureEntry>,

    /// Intact records in the log
    pub records: usize,

    /// Records that carry a decoded QR payload
    pub records_with_payload: usize,

    /// Unreadable lines in the log
    pub skipped_lines: usize,

    /// Bytes of a partial trailing line awaiting repair
    pub torn_bytes: u64,

    /// Files in the artifact directory
    pub artifacts: usize,

    /// Pending tasks saved for resume
    pub frontier: usize,
}

/// Loads statistics from the ledger and the output directory
///
/// # Arguments
///
/// * `ledger` - Run ledger to query
/// * `log_path` - Record log to replay (not modified)
/// * `artifact_dir` - Artifact directory to count
pub fn load_statistics(
    ledger: &dyn Ledger,
    log_path: &Path,
    artifact_dir: &Path,
) -> Result<CrawlStatistics, StatsError> {
    let replay = RecordLog::replay(log_path)?;
    let artifacts = if artifact_dir.is_dir() {
        ArtifactStore::open(artifact_dir)?.count()
    } else {
        0
    };

    Ok(CrawlStatistics {
        runs: ledger.list_runs(10)?,
        failure_summary: ledger.failure_summary()?,
        recent_failures: ledger.recent_failures(10)?,
        records: replay.records(),
        records_with_payload: replay.records_with_payload,
        skipped_lines: replay.skipped_lines,
        torn_bytes: replay.torn_bytes,
        artifacts,
        frontier: ledger.load_frontier()?.len(),
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("Record log:");
    println!("  Records: {}", stats.records);
    println!("  With QR payload: {}", stats.records_with_payload);
    println!("  Artifacts stored: {}", stats.artifacts);
    if stats.skipped_lines > 0 {
        println!("  Unreadable lines: {}", stats.skipped_lines);
    }
    if stats.torn_bytes > 0 {
        println!(
            "  Partial trailing line: {} bytes (repaired on next run)",
            stats.torn_bytes
        );
    }
    println!();

    if stats.runs.is_empty() {
        println!("No runs recorded yet.");
    } else {
        println!("Recent runs:");
        for run in &stats.runs {
            println!(
                "  #{} {} [{}] succeeded={} admitted={} duplicates={} failed={}",
                run.id,
                run.started_at,
                run.status.to_db_string(),
                run.totals.tasks_succeeded,
                run.totals.records_admitted,
                run.totals.duplicates_discarded,
                run.totals.permanent_failures
            );
        }
    }
    println!();

    if !stats.failure_summary.is_empty() {
        println!("Permanent failures by reason:");
        for (reason, count) in &stats.failure_summary {
            println!("  {}: {}", reason, count);
        }
        println!();

        println!("Most recent failures:");
        for failure in &stats.recent_failures {
            println!(
                "  {} ({}, {} attempts): {}",
                failure.locator, failure.reason, failure.attempts, failure.detail
            );
        }
        println!();
    }

    if stats.frontier > 0 {
        println!("Saved frontier: {} pending tasks", stats.frontier);
    }
}
