//! Ledger trait and error types

use crate::storage::{FailureEntry, FrontierEntry, RunRecord, RunStatus, RunTotals};
use thiserror::Error;

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for ledger operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Bookkeeping store for crawl runs
///
/// The ledger never decides what gets crawled or admitted; the record log is
/// the source of truth for content. It keeps run history, permanent failures
/// and the frontier an interrupted run left behind.
pub trait Ledger: Send {
    // ===== Run Management =====

    /// Creates a new run in the `running` state
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Most recent runs first
    fn list_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>>;

    /// Stamps the finish time, final status and totals on a run
    fn finish_run(&mut self, run_id: i64, status: RunStatus, totals: &RunTotals)
        -> StorageResult<()>;

    // ===== Failures =====

    fn record_failure(&mut self, run_id: i64, failure: &FailureEntry) -> StorageResult<()>;

    /// Failure counts per reason across all runs, largest first
    fn failure_summary(&self) -> StorageResult<Vec<(String, u64)>>;

    fn recent_failures(&self, limit: usize) -> StorageResult<Vec<FailureEntry>>;

    // ===== Frontier =====

    /// Replaces the saved frontier with `entries`
    fn save_frontier(&mut self, run_id: i64, entries: &[FrontierEntry]) -> StorageResult<()>;

    /// Saved frontier, highest priority first
    fn load_frontier(&self) -> StorageResult<Vec<FrontierEntry>>;

    fn clear_frontier(&mut self) -> StorageResult<()>;
}
