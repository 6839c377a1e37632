//! Retry/backoff controller
//!
//! Failed tasks come back here. Retryable failures under the attempt cap are
//! re-enqueued with an exponentially growing delay; everything else is a
//! permanent failure and leaves the crawl for good.

use crate::config::{BackoffConfig, CrawlerConfig};
use crate::queue::task::CrawlTask;
use crate::queue::task_queue::TaskQueue;
use crate::state::{FetchFailure, HealthReporter};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Exponential backoff with a cap and optional positive jitter
///
/// `delay(n) = min(base * multiplier^(n-1) * (1 + j), max)` with `j` drawn
/// from `[0, jitter)`. Because `jitter < multiplier - 1`, every delay below
/// the cap is strictly larger than the one before it.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl BackoffPolicy {
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_ms),
            max: Duration::from_millis(config.max_ms),
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }

    /// Delay before the retry that follows attempt number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.base.as_secs_f64() * self.multiplier.powi(exponent);

        let factor = if self.jitter > 0.0 {
            1.0 + rand::random_range(0.0..self.jitter)
        } else {
            1.0
        };

        let capped = (raw * factor).min(self.max.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

/// What the controller did with a failed task
#[derive(Debug)]
pub enum RetryDecision {
    /// Re-enqueued; eligible again after `delay`
    Rescheduled { attempt: u32, delay: Duration },
    /// Dropped for good
    Exhausted(CrawlTask),
}

/// Reschedules failed tasks with bounded attempts
pub struct RetryController {
    policy: BackoffPolicy,
    max_attempts: u32,
    queue: Arc<TaskQueue>,
    health: Arc<HealthReporter>,
}

impl RetryController {
    pub fn new(
        policy: BackoffPolicy,
        crawler: &CrawlerConfig,
        queue: Arc<TaskQueue>,
        health: Arc<HealthReporter>,
    ) -> Self {
        Self {
            policy,
            max_attempts: crawler.max_attempts,
            queue,
            health,
        }
    }

    /// Handles one failed attempt of `task`
    ///
    /// The attempt counter is incremented here. A retryable failure with
    /// attempts left goes back into the queue with `not_before` pushed out;
    /// otherwise the task is reported as a permanent failure and returned to
    /// the caller for bookkeeping.
    pub fn on_failure(&self, mut task: CrawlTask, failure: &FetchFailure) -> RetryDecision {
        task.attempts += 1;

        if failure.retryable() && task.attempts < self.max_attempts {
            let delay = self.policy.delay(task.attempts);
            task.not_before = Instant::now() + delay;

            tracing::warn!(
                "Task {} ({}) failed on attempt {}/{}: {}; retrying in {:?}",
                task.id,
                task.locator,
                task.attempts,
                self.max_attempts,
                failure,
                delay
            );

            let attempt = task.attempts;
            self.queue.enqueue(task);
            self.health.retry_scheduled();
            return RetryDecision::Rescheduled { attempt, delay };
        }

        if failure.retryable() {
            tracing::warn!(
                "Task {} ({}) permanently failed after {} attempts: {}",
                task.id,
                task.locator,
                task.attempts,
                failure
            );
        } else {
            tracing::warn!(
                "Task {} ({}) permanently failed on attempt {}: {}",
                task.id,
                task.locator,
                task.attempts,
                failure
            );
        }

        self.health.permanent_failure();
        RetryDecision::Exhausted(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::task::TaskIds;
    use crate::state::FailureReason;
    use tokio_util::sync::CancellationToken;
    use url::Url;

    fn policy(jitter: f64) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter,
        }
    }

    fn controller(max_attempts: u32) -> (RetryController, Arc<TaskQueue>, Arc<HealthReporter>) {
        let health = Arc::new(HealthReporter::new());
        let queue = Arc::new(TaskQueue::new(CancellationToken::new(), Arc::clone(&health)));
        let crawler = CrawlerConfig {
            max_attempts,
            ..CrawlerConfig::default()
        };
        let retry = RetryController::new(policy(0.0), &crawler, Arc::clone(&queue), Arc::clone(&health));
        (retry, queue, health)
    }

    fn task() -> CrawlTask {
        CrawlTask::seed(TaskIds::new().next(), Url::parse("https://x.test/").unwrap(), 0)
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let p = policy(0.0);
        assert_eq!(p.delay(1), Duration::from_millis(100));
        assert_eq!(p.delay(2), Duration::from_millis(200));
        assert_eq!(p.delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped() {
        let p = policy(0.0);
        assert_eq!(p.delay(20), Duration::from_secs(10));
        assert_eq!(p.delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_jittered_delays_still_strictly_increase() {
        let p = policy(0.9);
        for _ in 0..200 {
            let delays: Vec<Duration> = (1..=6).map(|n| p.delay(n)).collect();
            assert!(delays.windows(2).all(|w| w[0] < w[1]), "{:?}", delays);
            assert!(delays[0] >= Duration::from_millis(100));
        }
    }

    #[tokio::test]
    async fn test_retryable_failure_is_rescheduled() {
        let (retry, queue, health) = controller(3);
        let failure = FetchFailure::new(FailureReason::Timeout, "slow");

        let decision = retry.on_failure(task(), &failure);

        assert!(matches!(decision, RetryDecision::Rescheduled { attempt: 1, .. }));
        assert_eq!(queue.len(), 1);
        assert_eq!(health.snapshot().retries_scheduled, 1);
    }

    #[tokio::test]
    async fn test_attempt_cap_ends_in_permanent_failure() {
        let (retry, queue, health) = controller(3);
        let failure = FetchFailure::new(FailureReason::Network, "reset");
        let mut current = task();

        for expected in 1..3 {
            match retry.on_failure(current, &failure) {
                RetryDecision::Rescheduled { attempt, .. } => assert_eq!(attempt, expected),
                other => panic!("expected a retry, got {:?}", other),
            }
            current = queue.drain().pop().unwrap();
        }

        match retry.on_failure(current, &failure) {
            RetryDecision::Exhausted(task) => assert_eq!(task.attempts, 3),
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert!(queue.is_empty());
        assert_eq!(health.snapshot().permanent_failures, 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_bypasses_backoff() {
        let (retry, queue, health) = controller(5);
        let failure = FetchFailure::new(FailureReason::NotFound, "HTTP 404");

        let decision = retry.on_failure(task(), &failure);

        assert!(matches!(decision, RetryDecision::Exhausted(ref t) if t.attempts == 1));
        assert!(queue.is_empty());
        assert_eq!(health.snapshot().retries_scheduled, 0);
        assert_eq!(health.snapshot().permanent_failures, 1);
    }
}
