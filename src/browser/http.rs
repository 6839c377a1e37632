//! Plain HTTP renderer
//!
//! Fetches the raw document without executing scripts. Useful for static
//! sites and for running the crawl where no Chromium is installed; unlike the
//! Chromium renderer it sees status codes and content types.

use crate::browser::traits::{RenderError, RenderSession, RenderedPage, Renderer};
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client, StatusCode};
use std::time::Duration;
use url::Url;

/// User agent sent when none is configured
pub const DEFAULT_USER_AGENT: &str = concat!("sumi-sieve/", env!("CARGO_PKG_VERSION"));

/// Hands out HTTP sessions, each with its own client and user agent
pub struct HttpRenderer {
    timeout: Duration,
}

impl HttpRenderer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Builds a client for one session
///
/// # Arguments
///
/// * `user_agent` - User agent header value
/// * `timeout` - Whole-request timeout
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(user_agent: &str, timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn launch(
        &self,
        slot: u64,
        user_agent: Option<String>,
    ) -> Result<Box<dyn RenderSession>, RenderError> {
        let ua = user_agent.unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let client =
            build_http_client(&ua, self.timeout).map_err(|e| RenderError::Launch(e.to_string()))?;
        tracing::debug!("HTTP session {} started", slot);
        Ok(Box::new(HttpSession { client }))
    }
}

/// One HTTP client; cookies and connections stay with the session
pub struct HttpSession {
    client: Client,
}

#[async_trait]
impl RenderSession for HttpSession {
    async fn render(&mut self, locator: &Url) -> Result<RenderedPage, RenderError> {
        let response = self
            .client
            .get(locator.clone())
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = response.status();
        let final_url = response.url().clone();

        if !status.is_success() {
            return Err(RenderError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !is_document(&content_type) {
            return Err(RenderError::ContentMismatch(content_type));
        }

        let html = response.text().await.map_err(classify_reqwest)?;
        Ok(RenderedPage { final_url, html })
    }

    async fn shutdown(self: Box<Self>) {}
}

/// Accepts HTML and other textual documents; a missing header is taken as HTML
fn is_document(content_type: &str) -> bool {
    content_type.is_empty()
        || content_type.contains("text/")
        || content_type.contains("application/xhtml")
}

fn classify_reqwest(err: reqwest::Error) -> RenderError {
    if err.is_timeout() {
        RenderError::Timeout
    } else if err.is_connect() {
        let message = err.to_string();
        if message.to_ascii_lowercase().contains("dns") {
            RenderError::Dns(message)
        } else {
            RenderError::Network(message)
        }
    } else if err.is_builder() {
        RenderError::Malformed(err.to_string())
    } else if let Some(status) = err.status() {
        match status {
            StatusCode::REQUEST_TIMEOUT => RenderError::Timeout,
            other => RenderError::Status(other.as_u16()),
        }
    } else {
        RenderError::Network(err.to_string())
    }
}
