//! Crawl engine counters for the monitoring console
//!
//! Components push into the reporter; nothing ever reads it back to make a
//! decision. The console gets a consistent-enough [`HealthSnapshot`] on
//! demand, either through [`HealthReporter::snapshot`] or the status file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Point-in-time view of the crawl engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    /// Pending tasks, including ones waiting out a backoff delay
    pub queue_depth: usize,
    pub in_flight: usize,
    pub sessions_in_use: usize,
    pub tasks_started: u64,
    pub tasks_succeeded: u64,
    pub retries_scheduled: u64,
    pub permanent_failures: u64,
    pub records_admitted: u64,
    pub duplicates_discarded: u64,
    pub artifacts_stored: u64,
    pub sessions_replaced: u64,
    pub fatal_error: Option<String>,
}

/// Shared counters and gauges
#[derive(Debug)]
pub struct HealthReporter {
    started_at: DateTime<Utc>,
    started: Instant,
    queue_depth: AtomicUsize,
    in_flight: AtomicUsize,
    sessions_in_use: AtomicUsize,
    tasks_started: AtomicU64,
    tasks_succeeded: AtomicU64,
    retries_scheduled: AtomicU64,
    permanent_failures: AtomicU64,
    records_admitted: AtomicU64,
    duplicates_discarded: AtomicU64,
    artifacts_stored: AtomicU64,
    sessions_replaced: AtomicU64,
    fatal_error: Mutex<Option<String>>,
}

impl Default for HealthReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthReporter {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
            queue_depth: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            sessions_in_use: AtomicUsize::new(0),
            tasks_started: AtomicU64::new(0),
            tasks_succeeded: AtomicU64::new(0),
            retries_scheduled: AtomicU64::new(0),
            permanent_failures: AtomicU64::new(0),
            records_admitted: AtomicU64::new(0),
            duplicates_discarded: AtomicU64::new(0),
            artifacts_stored: AtomicU64::new(0),
            sessions_replaced: AtomicU64::new(0),
            fatal_error: Mutex::new(None),
        }
    }

    // ===== Gauges =====

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn set_in_flight(&self, count: usize) {
        self.in_flight.store(count, Ordering::Relaxed);
    }

    pub fn set_sessions_in_use(&self, count: usize) {
        self.sessions_in_use.store(count, Ordering::Relaxed);
    }

    // ===== Counters =====

    pub fn task_started(&self) {
        self.tasks_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_succeeded(&self) {
        self.tasks_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retry_scheduled(&self) {
        self.retries_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn permanent_failure(&self) {
        self.permanent_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_admitted(&self) {
        self.records_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn duplicate_discarded(&self) {
        self.duplicates_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn artifact_stored(&self) {
        self.artifacts_stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_replaced(&self) {
        self.sessions_replaced.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the error that stopped the crawl; only the first one is kept
    pub fn set_fatal(&self, message: impl Into<String>) {
        let mut fatal = self
            .fatal_error
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if fatal.is_none() {
            *fatal = Some(message.into());
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let fatal_error = self
            .fatal_error
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();

        HealthSnapshot {
            started_at: self.started_at,
            uptime_secs: self.started.elapsed().as_secs(),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            sessions_in_use: self.sessions_in_use.load(Ordering::Relaxed),
            tasks_started: self.tasks_started.load(Ordering::Relaxed),
            tasks_succeeded: self.tasks_succeeded.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            permanent_failures: self.permanent_failures.load(Ordering::Relaxed),
            records_admitted: self.records_admitted.load(Ordering::Relaxed),
            duplicates_discarded: self.duplicates_discarded.load(Ordering::Relaxed),
            artifacts_stored: self.artifacts_stored.load(Ordering::Relaxed),
            sessions_replaced: self.sessions_replaced.load(Ordering::Relaxed),
            fatal_error,
        }
    }
}
