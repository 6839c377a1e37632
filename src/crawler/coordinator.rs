//! Crawler coordinator - run setup and teardown
//!
//! This module wires the crawl together:
//! - Replaying the record log into the deduplicator
//! - Opening the run ledger and resuming a saved frontier
//! - Seeding the queue and starting the worker set
//! - Stopping on completion, interruption or a fatal write failure
//! - Saving the frontier and stamping run totals

use crate::browser::{BrowserPool, ChromiumRenderer, HttpRenderer, Renderer};
use crate::config::{Config, Engine};
use crate::crawler::fetcher::Fetcher;
use crate::crawler::worker::{run_worker, CrawlContext};
use crate::dedup::Deduplicator;
use crate::extract::ExtractionPipeline;
use crate::output::{spawn_status_writer, PersistenceWriter};
use crate::queue::{BackoffPolicy, CrawlTask, Lineage, RetryController, TaskIds, TaskQueue};
use crate::state::{HealthReporter, HealthSnapshot};
use crate::storage::{FrontierEntry, Ledger, RunStatus, RunTotals, SqliteLedger};
use crate::url::normalize_url;
use crate::SieveError;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Summary of a finished run
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub run_id: i64,
    pub status: RunStatus,
    pub snapshot: HealthSnapshot,
    /// Tasks saved to the ledger for the next run
    pub frontier_saved: usize,
    pub elapsed: Duration,
}

/// Main crawler coordinator structure
pub struct Coordinator {
    ctx: Arc<CrawlContext>,
    workers: usize,
    status_path: Option<PathBuf>,
    status_interval: Duration,
}

impl Coordinator {
    /// Creates a coordinator with the renderer named in the configuration
    ///
    /// # Arguments
    ///
    /// * `config` - The crawl configuration
    /// * `config_hash` - Hash of the configuration file, stored with the run
    /// * `fresh` - Discard any saved frontier instead of resuming it
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Ready to run
    /// * `Err(SieveError)` - Output, ledger or seeds could not be set up
    pub fn new(config: Config, config_hash: &str, fresh: bool) -> Result<Self, SieveError> {
        let timeout = Duration::from_millis(config.crawler.task_timeout_ms);
        let renderer: Arc<dyn Renderer> = match config.browser.engine {
            Engine::Chromium => Arc::new(ChromiumRenderer::new(&config.browser, timeout)),
            Engine::Http => Arc::new(HttpRenderer::new(timeout)),
        };
        Self::with_renderer(config, config_hash, fresh, renderer)
    }

    /// Creates a coordinator around an explicit renderer
    pub fn with_renderer(
        config: Config,
        config_hash: &str,
        fresh: bool,
        renderer: Arc<dyn Renderer>,
    ) -> Result<Self, SieveError> {
        let health = Arc::new(HealthReporter::new());
        let cancel = CancellationToken::new();

        // Output first: an unwritable log should stop us before anything else
        let (writer, replay) = PersistenceWriter::open(
            Path::new(&config.output.log_path),
            Path::new(&config.output.artifact_dir),
            Arc::clone(&health),
        )?;
        if replay.skipped_lines > 0 || replay.torn_bytes > 0 {
            tracing::warn!(
                "Record log {}: skipped {} unreadable lines, truncated {} trailing bytes",
                writer.log_path().display(),
                replay.skipped_lines,
                replay.torn_bytes
            );
        }
        tracing::info!(
            "Replayed {} records from {}",
            replay.records(),
            writer.log_path().display()
        );
        let dedup = Deduplicator::from_fingerprints(replay.fingerprints, Arc::clone(&health));

        let mut ledger = SqliteLedger::new(Path::new(&config.output.ledger_path))?;
        let run_id = ledger.create_run(config_hash)?;

        let queue = Arc::new(TaskQueue::new(cancel.clone(), Arc::clone(&health)));
        let ids = TaskIds::new();
        let lineage = Lineage::new();

        if fresh {
            tracing::info!("Fresh run requested, discarding saved frontier");
            ledger.clear_frontier()?;
        } else {
            let saved = ledger.load_frontier()?;
            if !saved.is_empty() {
                tracing::info!("Resuming {} tasks from the saved frontier", saved.len());
            }
            for entry in saved {
                let locator = match normalize_url(&entry.locator) {
                    Ok(locator) => locator,
                    Err(e) => {
                        tracing::warn!("Dropping saved task {}: {}", entry.locator, e);
                        continue;
                    }
                };
                let task = CrawlTask {
                    id: ids.next(),
                    locator,
                    priority: entry.priority,
                    depth: entry.depth,
                    attempts: entry.attempts,
                    not_before: Instant::now(),
                    parent: None,
                };
                lineage.record(&task);
                let id = task.id;
                if !queue.offer(task) {
                    lineage.forget(id);
                }
            }
        }

        for seed in &config.seeds {
            let locator = normalize_url(seed)?;
            let task = CrawlTask::seed(ids.next(), locator, config.crawler.seed_priority);
            lineage.record(&task);
            let id = task.id;
            if !queue.offer(task) {
                lineage.forget(id);
            }
        }
        tracing::info!("Run {} starting with {} queued tasks", run_id, queue.len());

        let pipeline = ExtractionPipeline::from_config(&config)?;
        let fetcher = Fetcher::new(&config, pipeline.rules())?;
        let pool = BrowserPool::new(
            renderer,
            config.browser.pool_size as usize,
            Duration::from_millis(config.browser.acquire_timeout_ms),
            config.browser.user_agents.clone(),
            Arc::clone(&health),
        );
        let retry = RetryController::new(
            BackoffPolicy::from_config(&config.backoff),
            &config.crawler,
            Arc::clone(&queue),
            Arc::clone(&health),
        );

        let ctx = CrawlContext {
            queue,
            pool,
            fetcher,
            pipeline,
            dedup,
            writer,
            retry,
            lineage,
            ids,
            health,
            ledger: Mutex::new(ledger),
            run_id,
            cancel,
        };

        Ok(Self {
            ctx: Arc::new(ctx),
            workers: config.crawler.workers as usize,
            status_path: config.output.status_path.as_ref().map(PathBuf::from),
            status_interval: Duration::from_millis(config.output.status_interval_ms),
        })
    }

    pub fn run_id(&self) -> i64 {
        self.ctx.run_id
    }

    pub fn health(&self) -> Arc<HealthReporter> {
        Arc::clone(&self.ctx.health)
    }

    /// Cancelling this token stops the crawl after in-flight page loads are
    /// abandoned; their tasks are saved with the frontier
    pub fn cancellation_token(&self) -> CancellationToken {
        self.ctx.cancel.clone()
    }

    /// Runs the crawl to completion, interruption or failure
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlReport)` - The run finished or was interrupted
    /// * `Err(SieveError)` - A worker hit a fatal error; bookkeeping was
    ///   still completed
    pub async fn run(self) -> Result<CrawlReport, SieveError> {
        let ctx = self.ctx;
        let start = std::time::Instant::now();

        let status_stop = CancellationToken::new();
        let status_writer = self.status_path.map(|path| {
            tracing::debug!("Writing status snapshots to {}", path.display());
            spawn_status_writer(
                path,
                self.status_interval,
                Arc::clone(&ctx.health),
                status_stop.clone(),
            )
        });

        tracing::info!("Starting {} workers for run {}", self.workers, ctx.run_id);
        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            workers.spawn(run_worker(id, Arc::clone(&ctx)));
        }

        let mut fatal: Option<SieveError> = None;
        while let Some(joined) = workers.join_next().await {
            let err = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => SieveError::from(e),
                Err(e) => SieveError::Worker(e.to_string()),
            };
            if fatal.is_none() {
                tracing::error!("Stopping crawl: {}", err);
                ctx.health.set_fatal(err.to_string());
                ctx.cancel.cancel();
                fatal = Some(err);
            }
        }

        let status = if fatal.is_some() {
            RunStatus::Failed
        } else if ctx.cancel.is_cancelled() {
            RunStatus::Interrupted
        } else {
            RunStatus::Completed
        };

        let frontier: Vec<FrontierEntry> = ctx
            .queue
            .drain()
            .into_iter()
            .map(|task| FrontierEntry {
                locator: task.locator.to_string(),
                priority: task.priority,
                depth: task.depth,
                attempts: task.attempts,
            })
            .collect();

        ctx.pool.shutdown().await;

        let snapshot = ctx.health.snapshot();
        let totals = RunTotals {
            tasks_succeeded: snapshot.tasks_succeeded,
            records_admitted: snapshot.records_admitted,
            duplicates_discarded: snapshot.duplicates_discarded,
            permanent_failures: snapshot.permanent_failures,
        };

        {
            let mut ledger = ctx.ledger.lock().unwrap_or_else(PoisonError::into_inner);
            let saved = if frontier.is_empty() {
                ledger.clear_frontier()
            } else {
                ledger.save_frontier(ctx.run_id, &frontier)
            };
            if let Err(e) = saved {
                tracing::warn!("Failed to save frontier: {}", e);
            }
            if let Err(e) = ledger.finish_run(ctx.run_id, status, &totals) {
                tracing::warn!("Failed to finish run {} in the ledger: {}", ctx.run_id, e);
            }
        }

        status_stop.cancel();
        if let Some(handle) = status_writer {
            if let Err(e) = handle.await {
                tracing::warn!("Status writer ended abnormally: {}", e);
            }
        }

        let elapsed = start.elapsed();
        tracing::info!(
            "Run {} {} in {:.1}s: {} pages, {} records admitted, {} duplicates, {} permanent failures, {} tasks saved",
            ctx.run_id,
            status.to_db_string(),
            elapsed.as_secs_f64(),
            totals.tasks_succeeded,
            totals.records_admitted,
            totals.duplicates_discarded,
            totals.permanent_failures,
            frontier.len()
        );

        if let Some(err) = fatal {
            return Err(err);
        }

        Ok(CrawlReport {
            run_id: ctx.run_id,
            status,
            snapshot,
            frontier_saved: frontier.len(),
            elapsed,
        })
    }
}
