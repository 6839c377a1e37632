//! Headless Chromium sessions over the DevTools protocol
//!
//! Every session is its own browser process with a throwaway profile
//! directory, so a crash or a poisoned cookie jar stays with one session.

use crate::browser::traits::{RenderError, RenderSession, RenderedPage, Renderer};
use crate::config::BrowserConfig;
use async_trait::async_trait;
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use url::Url;

/// Launches one Chromium process per session
pub struct ChromiumRenderer {
    headless: bool,
    executable: Option<PathBuf>,
    args: Vec<String>,
    request_timeout: Duration,
}

impl ChromiumRenderer {
    /// # Arguments
    ///
    /// * `config` - Browser section of the crawl configuration
    /// * `request_timeout` - Upper bound for a single DevTools command
    pub fn new(config: &BrowserConfig, request_timeout: Duration) -> Self {
        Self {
            headless: config.headless,
            executable: config.executable.as_ref().map(PathBuf::from),
            args: config.args.clone(),
            request_timeout,
        }
    }

    fn browser_config(&self, profile: &TempDir) -> Result<chromiumoxide::BrowserConfig, RenderError> {
        let mut builder = chromiumoxide::BrowserConfig::builder()
            .no_sandbox()
            .request_timeout(self.request_timeout)
            .user_data_dir(profile.path())
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage");

        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(ref executable) = self.executable {
            builder = builder.chrome_executable(executable);
        }
        for arg in &self.args {
            builder = builder.arg(arg.as_str());
        }

        builder.build().map_err(RenderError::Launch)
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn launch(
        &self,
        slot: u64,
        user_agent: Option<String>,
    ) -> Result<Box<dyn RenderSession>, RenderError> {
        let profile = tempfile::Builder::new()
            .prefix("sumi-sieve-profile-")
            .tempdir()
            .map_err(|e| RenderError::Launch(format!("profile directory: {}", e)))?;

        let (mut browser, mut handler) = Browser::launch(self.browser_config(&profile)?)
            .await
            .map_err(|e| RenderError::Launch(e.to_string()))?;

        let alive = Arc::new(AtomicBool::new(true));
        let events = {
            let alive = Arc::clone(&alive);
            tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
                alive.store(false, Ordering::SeqCst);
                tracing::debug!("Chromium session {} event loop ended", slot);
            })
        };

        let page = match open_page(&browser, user_agent.as_deref()).await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.close().await;
                let _ = browser.wait().await;
                events.abort();
                return Err(e);
            }
        };

        tracing::debug!("Chromium session {} started", slot);

        Ok(Box::new(ChromiumSession {
            slot,
            browser,
            page,
            events,
            alive,
            _profile: profile,
        }))
    }
}

async fn open_page(browser: &Browser, user_agent: Option<&str>) -> Result<Page, RenderError> {
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| RenderError::Launch(e.to_string()))?;
    if let Some(ua) = user_agent {
        page.set_user_agent(ua)
            .await
            .map_err(|e| RenderError::Launch(e.to_string()))?;
    }
    Ok(page)
}

/// One running Chromium process with a single reusable tab
pub struct ChromiumSession {
    slot: u64,
    browser: Browser,
    page: Page,
    events: JoinHandle<()>,
    alive: Arc<AtomicBool>,
    _profile: TempDir,
}

#[async_trait]
impl RenderSession for ChromiumSession {
    async fn render(&mut self, locator: &Url) -> Result<RenderedPage, RenderError> {
        if !self.is_alive() {
            return Err(RenderError::Crashed(format!(
                "session {} is no longer running",
                self.slot
            )));
        }

        self.page
            .goto(locator.as_str())
            .await
            .map_err(classify_cdp)?;

        let html = self.page.content().await.map_err(classify_cdp)?;

        let final_url = self
            .page
            .url()
            .await
            .map_err(classify_cdp)?
            .and_then(|current| Url::parse(&current).ok())
            .unwrap_or_else(|| locator.clone());

        Ok(RenderedPage { final_url, html })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.events.is_finished()
    }

    async fn shutdown(mut self: Box<Self>) {
        if let Err(e) = self.browser.close().await {
            tracing::debug!("Chromium session {} close failed: {}", self.slot, e);
        }
        let _ = self.browser.wait().await;
        self.events.abort();
        tracing::debug!("Chromium session {} shut down", self.slot);
    }
}

/// Maps a DevTools error onto the render failure taxonomy
fn classify_cdp(err: CdpError) -> RenderError {
    match err {
        CdpError::Timeout => RenderError::Timeout,
        CdpError::NoResponse | CdpError::Ws(_) => RenderError::Crashed(err.to_string()),
        other => classify_message(&other.to_string()),
    }
}

/// Classifies a navigation failure by the net error Chromium reports
fn classify_message(message: &str) -> RenderError {
    let detail = message.to_string();
    if message.contains("ERR_NAME_NOT_RESOLVED") || message.contains("ERR_NAME_RESOLUTION_FAILED") {
        RenderError::Dns(detail)
    } else if message.contains("ERR_INVALID_URL") || message.contains("ERR_UNSAFE_PORT") {
        RenderError::Malformed(detail)
    } else if message.contains("ERR_TIMED_OUT") || message.contains("ERR_CONNECTION_TIMED_OUT") {
        RenderError::Timeout
    } else if message.contains("Target closed") || message.contains("crashed") {
        RenderError::Crashed(detail)
    } else {
        RenderError::Network(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_dns() {
        assert!(matches!(
            classify_message("net::ERR_NAME_NOT_RESOLVED at https://nope.test/"),
            RenderError::Dns(_)
        ));
    }

    #[test]
    fn test_classify_timeout_and_malformed() {
        assert!(matches!(
            classify_message("net::ERR_TIMED_OUT"),
            RenderError::Timeout
        ));
        assert!(matches!(
            classify_message("net::ERR_INVALID_URL"),
            RenderError::Malformed(_)
        ));
    }

    #[test]
    fn test_classify_crash_and_fallback() {
        assert!(matches!(
            classify_message("Target closed"),
            RenderError::Crashed(_)
        ));
        assert!(matches!(
            classify_message("net::ERR_CONNECTION_REFUSED"),
            RenderError::Network(_)
        ));
    }

    #[test]
    fn test_cdp_timeout_maps_to_timeout() {
        assert!(matches!(classify_cdp(CdpError::Timeout), RenderError::Timeout));
        assert!(matches!(
            classify_cdp(CdpError::NoResponse),
            RenderError::Crashed(_)
        ));
    }
}
