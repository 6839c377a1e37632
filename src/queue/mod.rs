//! Task queue, lineage index and retry/backoff controller

mod lineage;
mod retry;
mod task;
mod task_queue;

pub use lineage::Lineage;
pub use retry::{BackoffPolicy, RetryController, RetryDecision};
pub use task::{CrawlTask, TaskId, TaskIds};
pub use task_queue::{Dequeued, TaskQueue};
