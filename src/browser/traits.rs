//! Renderer traits and error types
//!
//! A [`Renderer`] launches sessions; a [`RenderSession`] loads one page at a
//! time. The pool treats both as black boxes.

use crate::state::{FailureReason, FetchFailure};
use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Errors a renderer can report for one page load
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Renderer crashed: {0}")]
    Crashed(String),

    #[error("Page load timed out")]
    Timeout,

    #[error("DNS resolution failed: {0}")]
    Dns(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed locator: {0}")]
    Malformed(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Unsupported content type: {0}")]
    ContentMismatch(String),

    #[error("Failed to launch renderer: {0}")]
    Launch(String),
}

impl RenderError {
    /// Maps the error onto the crawl failure taxonomy
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::Crashed(_) | Self::Launch(_) => FailureReason::RendererCrashed,
            Self::Timeout => FailureReason::Timeout,
            Self::Dns(_) => FailureReason::Dns,
            Self::Network(_) => FailureReason::Network,
            Self::Malformed(_) => FailureReason::Malformed,
            Self::Status(code) => FailureReason::from_status(*code),
            Self::ContentMismatch(_) => FailureReason::ContentMismatch,
        }
    }
}

impl From<RenderError> for FetchFailure {
    fn from(err: RenderError) -> Self {
        FetchFailure::new(err.reason(), err.to_string())
    }
}

/// Snapshot of a loaded page
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// Locator after redirects
    pub final_url: Url,
    /// Serialized DOM (or raw body for non-scripted renderers)
    pub html: String,
}

/// Launches renderer sessions
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Starts a new session
    ///
    /// # Arguments
    ///
    /// * `slot` - Sequence number of this launch, for logging
    /// * `user_agent` - User agent the session presents, if configured
    async fn launch(
        &self,
        slot: u64,
        user_agent: Option<String>,
    ) -> Result<Box<dyn RenderSession>, RenderError>;
}

/// One renderer instance, used by a single worker at a time
#[async_trait]
pub trait RenderSession: Send {
    /// Navigates to `locator`, waits for load and returns the page
    async fn render(&mut self, locator: &Url) -> Result<RenderedPage, RenderError>;

    /// Returns false once the underlying renderer is known to be dead
    fn is_alive(&self) -> bool {
        true
    }

    /// Tears the renderer down
    async fn shutdown(self: Box<Self>);
}
