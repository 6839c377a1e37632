use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;
use url::Url;

/// Identifier of a crawl task, unique within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out task ids
#[derive(Debug, Default)]
pub struct TaskIds {
    next: AtomicU64,
}

impl TaskIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> TaskId {
        TaskId(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// A unit of crawl work
#[derive(Debug, Clone)]
pub struct CrawlTask {
    pub id: TaskId,

    /// Normalized target locator
    pub locator: Url,

    /// Higher values are dequeued first
    pub priority: i32,

    /// Link distance from the seed (seeds are depth 0)
    pub depth: u32,

    /// Attempts already made
    pub attempts: u32,

    /// The task is not eligible for dequeue before this instant
    pub not_before: Instant,

    /// Task whose page linked here
    pub parent: Option<TaskId>,
}

impl CrawlTask {
    /// Creates a depth-0 task that is eligible immediately
    pub fn seed(id: TaskId, locator: Url, priority: i32) -> Self {
        Self {
            id,
            locator,
            priority,
            depth: 0,
            attempts: 0,
            not_before: Instant::now(),
            parent: None,
        }
    }

    /// Creates a task for a link discovered on this task's page
    pub fn child(&self, id: TaskId, locator: Url) -> Self {
        Self {
            id,
            locator,
            priority: self.priority.saturating_sub(1),
            depth: self.depth + 1,
            attempts: 0,
            not_before: Instant::now(),
            parent: Some(self.id),
        }
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        self.not_before <= now
    }
}
