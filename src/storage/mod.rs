//! Run ledger
//!
//! SQLite bookkeeping beside the record log:
//! - Run tracking with config hash, final status and totals
//! - Permanent failures with their reason and attempt count
//! - Frontier snapshot written on interrupt, reloaded on resume

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteLedger;
pub use traits::{Ledger, StorageError, StorageResult};

use crate::state::FailureReason;

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub totals: RunTotals,
}

/// Counters stamped on a run when it finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTotals {
    pub tasks_succeeded: u64,
    pub records_admitted: u64,
    pub duplicates_discarded: u64,
    pub permanent_failures: u64,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A task that was dropped for good
#[derive(Debug, Clone, PartialEq)]
pub struct FailureEntry {
    pub locator: String,
    pub reason: FailureReason,
    pub detail: String,
    pub attempts: u32,
    pub depth: u32,
    pub failed_at: String,
}

/// A pending task saved for the next run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    pub locator: String,
    pub priority: i32,
    pub depth: u32,
    pub attempts: u32,
}
