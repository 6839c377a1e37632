//! Fetch step
//!
//! This module drives a leased renderer session for one task:
//! - Page load under the per-task timeout
//! - Block / captcha wall detection
//! - Image capture from `data:` URIs or over HTTP, bounded by count and size
//!
//! Image capture needs no session and runs after the lease is returned. All
//! downloads for one page share a single deadline of one task timeout.
//!
//! Failures come back as [`FetchFailure`] so the retry controller can decide
//! what happens next.

use crate::browser::{build_http_client, RenderedPage, SessionLease, DEFAULT_USER_AGENT};
use crate::config::Config;
use crate::extract::parser::page_image_sources;
use crate::extract::ExtractionRules;
use crate::queue::CrawlTask;
use crate::state::{FailureReason, FetchFailure};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// An image pulled from the page
#[derive(Debug, Clone)]
pub struct CapturedImage {
    /// Resolved `src`: an absolute URL or the full `data:` URI
    pub source: String,
    pub bytes: Vec<u8>,
}

/// What a successful fetch hands to extraction
#[derive(Debug, Clone)]
pub struct RenderedContent {
    /// Locator the task asked for
    pub locator: Url,
    /// Locator after redirects; relative links resolve against this
    pub final_url: Url,
    pub html: String,
    pub images: Vec<CapturedImage>,
}

/// Loads pages and captures their images
pub struct Fetcher {
    task_timeout: Duration,
    image_client: Client,
    rules: ExtractionRules,
    max_image_bytes: usize,
}

impl Fetcher {
    /// # Arguments
    ///
    /// * `config` - Crawl configuration (timeouts and image limits)
    /// * `rules` - Compiled extraction rules (image selector, block markers)
    pub fn new(config: &Config, rules: &ExtractionRules) -> Result<Self, reqwest::Error> {
        let task_timeout = Duration::from_millis(config.crawler.task_timeout_ms);
        let user_agent = config
            .browser
            .user_agents
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_USER_AGENT);

        Ok(Self {
            task_timeout,
            image_client: build_http_client(user_agent, task_timeout)?,
            rules: rules.clone(),
            max_image_bytes: config.extraction.max_image_bytes,
        })
    }

    /// Renders `task` with the leased session
    ///
    /// # Returns
    ///
    /// * `Ok(RenderedPage)` - The page loaded and is not a block wall
    /// * `Err(FetchFailure)` - Classified failure for the retry controller
    pub async fn render(
        &self,
        lease: &mut SessionLease,
        task: &CrawlTask,
    ) -> Result<RenderedPage, FetchFailure> {
        let page = match tokio::time::timeout(self.task_timeout, lease.render(&task.locator)).await
        {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(FetchFailure::new(
                    FailureReason::Timeout,
                    format!("page load exceeded {:?}", self.task_timeout),
                ))
            }
        };

        if let Some(marker) = self.rules.find_block_marker(&page.html) {
            return Err(FetchFailure::new(
                FailureReason::Blocked,
                format!("page shows block marker '{}'", marker),
            ));
        }

        Ok(page)
    }

    /// Captures the images of a rendered page
    ///
    /// Never fails: sources that cannot be captured before the deadline, or
    /// at all, are left out.
    pub async fn capture(&self, task: &CrawlTask, page: RenderedPage) -> RenderedContent {
        let images = if self.rules.max_images == 0 {
            Vec::new()
        } else {
            let sources = page_image_sources(
                &page.html,
                &self.rules.images,
                &page.final_url,
                self.rules.max_images,
            );
            self.capture_images(sources, Instant::now() + self.task_timeout)
                .await
        };

        RenderedContent {
            locator: task.locator.clone(),
            final_url: page.final_url,
            html: page.html,
            images,
        }
    }

    /// Captures every source it can by `deadline`; the rest are skipped
    async fn capture_images(&self, sources: Vec<String>, deadline: Instant) -> Vec<CapturedImage> {
        let mut images = Vec::with_capacity(sources.len());
        let mut expired = false;
        for source in sources {
            let bytes = if source.starts_with("data:") || source.starts_with("DATA:") {
                decode_data_uri(&source)
            } else if expired {
                None
            } else {
                match tokio::time::timeout_at(deadline, self.download(&source)).await {
                    Ok(bytes) => bytes,
                    Err(_) => {
                        tracing::debug!(
                            "Image capture deadline passed at {}; skipping remaining downloads",
                            truncate(&source)
                        );
                        expired = true;
                        None
                    }
                }
            };

            match bytes {
                Some(bytes) if bytes.len() <= self.max_image_bytes => {
                    images.push(CapturedImage { source, bytes });
                }
                Some(bytes) => {
                    tracing::debug!(
                        "Skipping image {} ({} bytes over the {} byte limit)",
                        truncate(&source),
                        bytes.len(),
                        self.max_image_bytes
                    );
                }
                None => {}
            }
        }
        images
    }

    async fn download(&self, source: &str) -> Option<Vec<u8>> {
        let response = match self.image_client.get(source).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::debug!("Image {} returned {}", source, response.status());
                return None;
            }
            Err(e) => {
                tracing::debug!("Image {} could not be fetched: {}", source, e);
                return None;
            }
        };

        if response
            .content_length()
            .is_some_and(|len| len > self.max_image_bytes as u64)
        {
            tracing::debug!("Image {} exceeds the size limit", source);
            return None;
        }

        match response.bytes().await {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(e) => {
                tracing::debug!("Image {} body could not be read: {}", source, e);
                None
            }
        }
    }
}

/// Decodes the payload of a `data:` URI
///
/// Base64 payloads are decoded; anything else is taken as raw bytes.
fn decode_data_uri(uri: &str) -> Option<Vec<u8>> {
    let (header, payload) = uri.get(5..)?.split_once(',')?;
    if header.to_ascii_lowercase().ends_with(";base64") {
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        match BASE64.decode(compact.as_bytes()) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::debug!("Undecodable data URI: {}", e);
                None
            }
        }
    } else {
        Some(payload.as_bytes().to_vec())
    }
}

fn truncate(source: &str) -> &str {
    match source.char_indices().nth(80) {
        Some((index, _)) => &source[..index],
        None => source,
    }
}
