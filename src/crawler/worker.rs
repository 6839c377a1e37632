//! Fetch workers
//!
//! Each worker loops: take the next task, lease a session, render, return the
//! session, capture images, extract, admit, persist, enqueue children.
//! Everything after image capture runs without an await, so a cancelled
//! worker never leaves a record half admitted.

use crate::browser::{BrowserPool, PoolError};
use crate::crawler::fetcher::Fetcher;
use crate::dedup::Deduplicator;
use crate::extract::ExtractionPipeline;
use crate::output::{DurabilityError, PersistenceWriter};
use crate::queue::{CrawlTask, Lineage, RetryController, RetryDecision, TaskIds, TaskQueue};
use crate::state::{FailureReason, FetchFailure, HealthReporter};
use crate::storage::{FailureEntry, Ledger, SqliteLedger};
use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Components shared by every worker in a run
pub(crate) struct CrawlContext {
    pub queue: Arc<TaskQueue>,
    pub pool: Arc<BrowserPool>,
    pub fetcher: Fetcher,
    pub pipeline: ExtractionPipeline,
    pub dedup: Deduplicator,
    pub writer: PersistenceWriter,
    pub retry: RetryController,
    pub lineage: Lineage,
    pub ids: TaskIds,
    pub health: Arc<HealthReporter>,
    pub ledger: Mutex<SqliteLedger>,
    pub run_id: i64,
    pub cancel: CancellationToken,
}

impl CrawlContext {
    fn record_permanent_failure(&self, task: &CrawlTask, failure: &FetchFailure) {
        let entry = FailureEntry {
            locator: task.locator.to_string(),
            reason: failure.reason,
            detail: failure.detail.clone(),
            attempts: task.attempts,
            depth: task.depth,
            failed_at: Utc::now().to_rfc3339(),
        };

        let chain = self.lineage.chain(task.id);
        if chain.len() > 1 {
            let path: Vec<&str> = chain.iter().rev().map(|url| url.as_str()).collect();
            tracing::debug!("Failed task {} was reached via {}", task.id, path.join(" -> "));
        }

        // Blocking SQLite write on the worker thread; it runs once per
        // exhausted task, outside the admit-then-append section.
        let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = ledger.record_failure(self.run_id, &entry) {
            tracing::warn!("Failed to record permanent failure of {}: {}", task.locator, e);
        }
    }
}

/// Runs one worker until the queue is finished or the crawl is cancelled
///
/// # Returns
///
/// * `Ok(())` - No work left, or cancelled
/// * `Err(DurabilityError)` - An admitted record could not be written; the
///   crawl must stop
pub(crate) async fn run_worker(id: usize, ctx: Arc<CrawlContext>) -> Result<(), DurabilityError> {
    tracing::debug!("Worker {} started", id);

    while let Some(dequeued) = ctx.queue.next().await {
        let task = dequeued.task.clone();

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => None,
            outcome = process_task(id, &ctx, &task) => Some(outcome),
        };

        match outcome {
            Some(Ok(())) => {}
            Some(Err(TaskError::Failed(failure))) => {
                if let RetryDecision::Exhausted(task) = ctx.retry.on_failure(task, &failure) {
                    ctx.record_permanent_failure(&task, &failure);
                    ctx.lineage.forget(task.id);
                }
            }
            Some(Err(TaskError::Fatal(e))) => {
                // The task stays pending so a resumed run picks it up again.
                ctx.queue.enqueue(task);
                return Err(e);
            }
            None => {
                tracing::debug!("Worker {} interrupted during {}", id, task.locator);
                ctx.queue.enqueue(task);
                break;
            }
        }

        drop(dequeued);
    }

    tracing::debug!("Worker {} finished", id);
    Ok(())
}

enum TaskError {
    Failed(FetchFailure),
    Fatal(DurabilityError),
}

impl From<FetchFailure> for TaskError {
    fn from(failure: FetchFailure) -> Self {
        Self::Failed(failure)
    }
}

async fn process_task(id: usize, ctx: &CrawlContext, task: &CrawlTask) -> Result<(), TaskError> {
    ctx.health.task_started();
    tracing::info!(
        "Worker {} fetching {} (depth {}, attempt {})",
        id,
        task.locator,
        task.depth,
        task.attempts + 1
    );

    let mut lease = ctx.pool.acquire().await.map_err(|e| match e {
        PoolError::Exhausted(_) | PoolError::Closed => {
            FetchFailure::new(FailureReason::PoolExhausted, e.to_string())
        }
        PoolError::Launch(inner) => {
            FetchFailure::new(FailureReason::RendererCrashed, inner.to_string())
        }
    })?;

    let rendered = ctx.fetcher.render(&mut lease, task).await;
    let healthy = match &rendered {
        Ok(_) => true,
        Err(failure) => !failure.reason.poisons_session(),
    };
    lease.release(healthy);
    let content = ctx.fetcher.capture(task, rendered?).await;

    let via = ctx.lineage.parent_locator(task);
    let extraction = ctx
        .pipeline
        .extract(task, &content, &ctx.ids, via.as_ref())
        .map_err(FetchFailure::from)?;

    let mut admitted = 0;
    for candidate in &extraction.records {
        if ctx.dedup.admit(&candidate.record) {
            ctx.writer.persist(candidate).map_err(TaskError::Fatal)?;
            admitted += 1;
        } else {
            tracing::debug!(
                "Duplicate record {} from {}",
                candidate.record.fingerprint,
                task.locator
            );
        }
    }

    let mut queued = 0;
    for child in extraction.children {
        ctx.lineage.record(&child);
        let child_id = child.id;
        if ctx.queue.offer(child) {
            queued += 1;
        } else {
            ctx.lineage.forget(child_id);
        }
    }

    ctx.health.task_succeeded();
    tracing::info!(
        "Worker {} finished {}: {} records ({} new), {} links queued",
        id,
        task.locator,
        extraction.records.len(),
        admitted,
        queued
    );
    Ok(())
}
