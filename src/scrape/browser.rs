//! Headless browser adapter for dynamic pages.
//!
//! One lazy browser instance per adapter: a live instance is probed with a
//! cheap call and reused, a dead one is relaunched. Pages are opened per
//! `fetch_rendered` call, so concurrent scrapes share the browser process
//! but never a page.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::rule::WaitConfig;

/// Default bound for container-selector waits.
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default cadence for container-selector polling.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Interval between render-stability probes.
const STABLE_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Consecutive identical snapshots required to call the DOM stable.
const STABLE_ROUNDS: usize = 2;

/// Upper bound on the stability wait.
const STABLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for browser operations.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// The launch configuration was rejected.
    #[error("failed to configure browser: {0}")]
    Launch(String),

    /// DevTools protocol failure (launch, navigation, content capture).
    #[error("browser error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
}

/// Renders a page and returns its HTML. Implemented by [`BrowserAdapter`];
/// tests substitute canned HTML.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Opens `url`, applies the wait config and returns the rendered HTML.
    async fn fetch_rendered(
        &self,
        url: &str,
        wait: Option<&WaitConfig>,
    ) -> Result<String, BrowserError>;
}

struct BrowserHandle {
    browser: Arc<Browser>,
    handler_task: JoinHandle<()>,
}

/// Process-wide headless browser service.
///
/// Owned by the composition root and shared via `Arc`; the underlying
/// browser is launched on first use. Launch prefers a system-installed
/// Chrome/Chromium discovered by the launcher over downloading one.
pub struct BrowserAdapter {
    inner: Mutex<Option<BrowserHandle>>,
    disable_web_security: bool,
}

impl Default for BrowserAdapter {
    fn default() -> Self {
        Self::new(false)
    }
}

impl BrowserAdapter {
    /// Creates an adapter; `disable_web_security` relaxes same-origin
    /// checks for pages that load chapter images cross-origin.
    #[must_use]
    pub fn new(disable_web_security: bool) -> Self {
        Self {
            inner: Mutex::new(None),
            disable_web_security,
        }
    }

    /// Returns a live browser, reusing the current instance when it still
    /// responds and launching a fresh one otherwise.
    async fn ensure_browser(&self) -> Result<Arc<Browser>, BrowserError> {
        let mut guard = self.inner.lock().await;

        if let Some(handle) = guard.as_ref() {
            // Cheap liveness probe; a dead instance is replaced.
            if handle.browser.pages().await.is_ok() {
                return Ok(Arc::clone(&handle.browser));
            }
            warn!("browser instance unresponsive, relaunching");
        }
        if let Some(old) = guard.take() {
            old.handler_task.abort();
        }

        let mut builder = BrowserConfig::builder();
        if self.disable_web_security {
            builder = builder.arg("--disable-web-security");
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config).await?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        info!("headless browser launched");
        let browser = Arc::new(browser);
        *guard = Some(BrowserHandle {
            browser: Arc::clone(&browser),
            handler_task,
        });
        Ok(browser)
    }

    /// Closes the browser and its handler task. Idempotent.
    pub async fn cleanup(&self) {
        let mut guard = self.inner.lock().await;
        let Some(handle) = guard.take() else {
            return;
        };
        handle.handler_task.abort();

        match Arc::try_unwrap(handle.browser) {
            Ok(mut browser) => {
                if let Err(error) = browser.close().await {
                    warn!(%error, "browser close failed");
                }
                let _ = browser.wait().await;
            }
            Err(_) => {
                // A fetch is still holding the browser; dropping the last
                // reference terminates the child process.
                warn!("browser still in use during cleanup, dropping handle");
            }
        }
        info!("headless browser closed");
    }
}

#[async_trait]
impl PageRenderer for BrowserAdapter {
    #[instrument(skip(self, wait), fields(url = %url))]
    async fn fetch_rendered(
        &self,
        url: &str,
        wait: Option<&WaitConfig>,
    ) -> Result<String, BrowserError> {
        let browser = self.ensure_browser().await?;
        let page = browser.new_page(url).await?;

        match wait {
            None => wait_render_stable(&page).await,
            Some(config) => {
                if !config.skip_navigation_wait {
                    if let Err(error) = page.wait_for_navigation().await {
                        debug!(%error, "navigation wait failed, continuing");
                    }
                }
                if !config.skip_render_stable {
                    wait_render_stable(&page).await;
                }

                let timeout = if config.timeout_ms > 0 {
                    Duration::from_millis(config.timeout_ms)
                } else {
                    DEFAULT_WAIT_TIMEOUT
                };
                let poll = if config.poll_ms > 0 {
                    Duration::from_millis(config.poll_ms)
                } else {
                    DEFAULT_POLL_INTERVAL
                };
                for selector in &config.container_selectors {
                    wait_for_selector(&page, selector, timeout, poll).await;
                }
            }
        }

        let html = page.content().await?;
        if let Err(error) = page.close().await {
            debug!(%error, "page close failed");
        }
        Ok(html)
    }
}

/// Waits until the DOM stops changing: consecutive content snapshots of the
/// same length, bounded by [`STABLE_TIMEOUT`].
async fn wait_render_stable(page: &Page) {
    let started = Instant::now();
    let mut last_len = 0usize;
    let mut stable_rounds = 0usize;

    while started.elapsed() < STABLE_TIMEOUT {
        tokio::time::sleep(STABLE_POLL_INTERVAL).await;
        let len = match page.content().await {
            Ok(content) => content.len(),
            Err(_) => return,
        };
        if len == last_len && len > 0 {
            stable_rounds += 1;
            if stable_rounds >= STABLE_ROUNDS {
                return;
            }
        } else {
            stable_rounds = 0;
            last_len = len;
        }
    }
    debug!("render stability wait timed out");
}

/// Polls until the selector has at least one matching element. Timeouts are
/// logged and tolerated; extraction decides what missing content means.
async fn wait_for_selector(page: &Page, selector: &str, timeout: Duration, poll: Duration) {
    let started = Instant::now();
    while started.elapsed() < timeout {
        if page.find_element(selector).await.is_ok() {
            return;
        }
        tokio::time::sleep(poll).await;
    }
    warn!(selector, "container selector never appeared");
}
