//! Pending-task queue shared by seeding, workers and the retry controller
//!
//! Ordering is priority first (higher wins), then insertion order. Tasks with
//! a `not_before` in the future stay in the heap and count toward the queue
//! depth but are skipped by `next` until their time comes.

use crate::queue::task::CrawlTask;
use crate::state::HealthReporter;
use dashmap::DashSet;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A task plus its insertion sequence number
struct QueuedTask {
    task: CrawlTask,
    seq: u64,
}

// Higher priority first; within one priority the lower sequence number
// (enqueued earlier) compares greater so the max-heap pops it first.
impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.task
            .priority
            .cmp(&other.task.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedTask {}

struct QueueState {
    heap: BinaryHeap<QueuedTask>,
    next_seq: u64,
    in_flight: usize,
}

/// Priority queue of crawl tasks
pub struct TaskQueue {
    state: Mutex<QueueState>,
    changed: Notify,
    seen: DashSet<String>,
    cancel: CancellationToken,
    health: Arc<HealthReporter>,
}

/// A dequeued task
///
/// While this value is alive the task counts as in flight, which keeps
/// other workers waiting instead of concluding the crawl is finished.
/// Re-enqueue a retry or enqueue children before dropping it.
pub struct Dequeued<'a> {
    pub task: CrawlTask,
    _slot: InFlightSlot<'a>,
}

struct InFlightSlot<'a> {
    queue: &'a TaskQueue,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.queue.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            self.queue.publish(&state);
        }
        self.queue.changed.notify_waiters();
    }
}

impl TaskQueue {
    pub fn new(cancel: CancellationToken, health: Arc<HealthReporter>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                in_flight: 0,
            }),
            changed: Notify::new(),
            seen: DashSet::new(),
            cancel,
            health,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &QueueState) {
        self.health.set_queue_depth(state.heap.len());
        self.health.set_in_flight(state.in_flight);
    }

    /// Adds a task unconditionally (used for retries and resumed work)
    pub fn enqueue(&self, task: CrawlTask) {
        self.seen.insert(task.locator.as_str().to_string());
        {
            let mut state = self.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(QueuedTask { task, seq });
            self.publish(&state);
        }
        self.changed.notify_waiters();
    }

    /// Adds a newly discovered task unless its locator was already queued
    ///
    /// Returns true if the task was accepted. Concurrent offers of the same
    /// locator accept exactly one.
    pub fn offer(&self, task: CrawlTask) -> bool {
        if !self.seen.insert(task.locator.as_str().to_string()) {
            return false;
        }
        self.enqueue(task);
        true
    }

    /// Waits for the highest-priority eligible task
    ///
    /// Returns `None` once the queue is empty with nothing in flight, or
    /// when the crawl is cancelled.
    pub async fn next(&self) -> Option<Dequeued<'_>> {
        loop {
            // Registered before inspecting state so a wakeup between the
            // check and the await is not lost.
            let changed = self.changed.notified();

            let wake_at = {
                let mut state = self.lock();
                if self.cancel.is_cancelled() {
                    return None;
                }

                let now = Instant::now();
                let mut deferred = Vec::new();
                let mut found = None;

                while let Some(queued) = state.heap.pop() {
                    if queued.task.is_ready(now) {
                        found = Some(queued);
                        break;
                    }
                    deferred.push(queued);
                }

                let wake_at = deferred.iter().map(|q| q.task.not_before).min();
                for queued in deferred {
                    state.heap.push(queued);
                }

                if let Some(queued) = found {
                    state.in_flight += 1;
                    self.publish(&state);
                    tracing::trace!(
                        "Dequeued task {} ({}), {} pending",
                        queued.task.id,
                        queued.task.locator,
                        state.heap.len()
                    );
                    return Some(Dequeued {
                        task: queued.task,
                        _slot: InFlightSlot { queue: self },
                    });
                }

                if state.heap.is_empty() && state.in_flight == 0 {
                    drop(state);
                    self.changed.notify_waiters();
                    return None;
                }

                wake_at
            };

            tokio::select! {
                _ = changed => {}
                _ = self.cancel.cancelled() => return None,
                _ = sleep_until(wake_at) => {}
            }
        }
    }

    /// Removes and returns every pending task, highest priority first
    pub fn drain(&self) -> Vec<CrawlTask> {
        let mut state = self.lock();
        let mut tasks = Vec::with_capacity(state.heap.len());
        while let Some(queued) = state.heap.pop() {
            tasks.push(queued.task);
        }
        self.publish(&state);
        tasks
    }

    /// Pending tasks, including ones not yet eligible
    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
