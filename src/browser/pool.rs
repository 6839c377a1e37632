//! Bounded pool of renderer sessions
//!
//! A semaphore with `size` permits bounds how many sessions are checked out.
//! Idle healthy sessions are reused; unhealthy ones are torn down and the
//! slot is refilled lazily by the next acquisition. A lease that is dropped
//! without an explicit release (panic, cancellation) counts as unhealthy, so
//! a crashed renderer can never hold a slot.

use crate::browser::traits::{RenderError, RenderSession, RenderedPage, Renderer};
use crate::browser::user_agent::UserAgentRotation;
use crate::state::HealthReporter;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use url::Url;

/// Errors from session acquisition
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("No renderer session became available within {0:?}")]
    Exhausted(Duration),

    #[error("Renderer pool is shut down")]
    Closed,

    #[error("Failed to start a renderer session: {0}")]
    Launch(#[source] RenderError),
}

/// Fixed-size renderer session pool
pub struct BrowserPool {
    renderer: Arc<dyn Renderer>,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Box<dyn RenderSession>>>,
    size: usize,
    acquire_timeout: Duration,
    in_use: AtomicUsize,
    launches: AtomicU64,
    closed: AtomicBool,
    user_agents: UserAgentRotation,
    health: Arc<HealthReporter>,
}

/// Exclusive use of one session
///
/// Call [`SessionLease::release`] to hand the session back; dropping the
/// lease instead tears the session down.
pub struct SessionLease {
    session: Option<Box<dyn RenderSession>>,
    pool: Arc<BrowserPool>,
    _permit: OwnedSemaphorePermit,
}

impl BrowserPool {
    /// Creates an empty pool; sessions are launched on first use
    pub fn new(
        renderer: Arc<dyn Renderer>,
        size: usize,
        acquire_timeout: Duration,
        user_agents: Vec<String>,
        health: Arc<HealthReporter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            renderer,
            permits: Arc::new(Semaphore::new(size)),
            idle: Mutex::new(Vec::with_capacity(size)),
            size,
            acquire_timeout,
            in_use: AtomicUsize::new(0),
            launches: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            user_agents: UserAgentRotation::new(user_agents),
            health,
        })
    }

    fn idle(&self) -> MutexGuard<'_, Vec<Box<dyn RenderSession>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Sessions currently checked out
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Waits for a free slot and returns a session for it
    ///
    /// Fails with [`PoolError::Exhausted`] if no slot frees up within the
    /// acquisition timeout.
    pub async fn acquire(self: &Arc<Self>) -> Result<SessionLease, PoolError> {
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        .map_err(|_| PoolError::Exhausted(self.acquire_timeout))?
        .map_err(|_| PoolError::Closed)?;

        let reusable = loop {
            let candidate = self.idle().pop();
            match candidate {
                Some(session) if session.is_alive() => break Some(session),
                Some(dead) => {
                    tracing::debug!("Discarding idle renderer session that died while parked");
                    self.teardown(dead);
                }
                None => break None,
            }
        };

        let session = match reusable {
            Some(session) => session,
            None => {
                let slot = self.launches.fetch_add(1, Ordering::Relaxed) + 1;
                let session = self
                    .renderer
                    .launch(slot, self.user_agents.next())
                    .await
                    .map_err(PoolError::Launch)?;
                if slot > self.size as u64 {
                    self.health.session_replaced();
                }
                tracing::debug!("Launched renderer session {}", slot);
                session
            }
        };

        let in_use = self.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.health.set_sessions_in_use(in_use);

        Ok(SessionLease {
            session: Some(session),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    fn reclaim(&self, session: Box<dyn RenderSession>, healthy: bool) {
        if healthy && session.is_alive() && !self.closed.load(Ordering::SeqCst) {
            self.idle().push(session);
        } else {
            self.teardown(session);
        }
    }

    fn teardown(&self, session: Box<dyn RenderSession>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(session.shutdown());
            }
            Err(_) => drop(session),
        }
    }

    /// Stops handing out sessions and shuts down every idle one
    ///
    /// Sessions still leased are torn down as their leases end.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.permits.close();

        let idle: Vec<_> = self.idle().drain(..).collect();
        tracing::debug!("Shutting down {} idle renderer sessions", idle.len());
        for session in idle {
            session.shutdown().await;
        }
    }
}

impl SessionLease {
    /// Loads a page with the leased session
    pub async fn render(&mut self, locator: &Url) -> Result<RenderedPage, RenderError> {
        match self.session.as_mut() {
            Some(session) => session.render(locator).await,
            None => Err(RenderError::Crashed("session already released".to_string())),
        }
    }

    /// Returns the session to the pool; unhealthy sessions are destroyed
    pub fn release(mut self, healthy: bool) {
        if let Some(session) = self.session.take() {
            self.pool.reclaim(session, healthy);
        }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::debug!("Renderer session dropped without release, tearing it down");
            self.pool.reclaim(session, false);
        }
        let in_use = self.pool.in_use.fetch_sub(1, Ordering::SeqCst) - 1;
        self.pool.health.set_sessions_in_use(in_use);
    }
}
