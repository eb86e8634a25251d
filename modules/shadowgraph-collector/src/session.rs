use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shadowgraph_common::ListType;

use crate::cookies;
use crate::error::{CollectError, Result};
use crate::extract::{self, Gate};
use crate::types::{CollectedProfile, CollectionStats, CollectorOptions, MemberRecord};
use crate::ListCollector;

/// Hard cap on total scroll rounds per list. Virtualized lists can keep
/// growing forever; stagnation alone is not a guaranteed exit.
const MAX_TOTAL_ROUNDS: u32 = 120;

/// How long to wait for the first entries after navigation.
const RENDER_WAIT: Duration = Duration::from_secs(10);
const RENDER_POLL: Duration = Duration::from_millis(500);

/// One long-lived browser for the whole run. All list scrapes share the
/// logged-in session; call `close()` on every exit path. If the process
/// unwinds without it, dropping the handle still kills the Chrome child.
pub struct BrowserSession {
    browser: tokio::sync::Mutex<Browser>,
    page: Page,
    handler_task: JoinHandle<()>,
    opts: CollectorOptions,
    cancel: CancellationToken,
}

impl BrowserSession {
    pub async fn launch(opts: CollectorOptions, cancel: CancellationToken) -> Result<Self> {
        let mut builder = BrowserConfig::builder().window_size(1280, 1024);
        if let Some(bin) = &opts.chrome_binary {
            builder = builder.chrome_executable(bin);
        }
        if !opts.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(CollectError::Browser)?;

        let (browser, mut handler) = Browser::launch(config).await?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await?;

        if let Some(path) = &opts.cookies_path {
            let cookies = cookies::load_bundle(path)?;
            let count = cookies.len();
            page.set_cookies(cookies).await?;
            info!(count, "Loaded session cookies");
        }

        info!(headless = opts.headless, "Browser session started");
        Ok(Self {
            browser: tokio::sync::Mutex::new(browser),
            page,
            handler_task,
            opts,
            cancel,
        })
    }

    /// Shut the browser down gracefully. Runs on success, error, and
    /// interrupt paths alike.
    pub async fn close(&self) {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            warn!(error = %e, "Browser close failed");
        }
        let _ = browser.wait().await;
        self.handler_task.abort();
        info!("Browser session closed");
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        debug!(url, "Navigating");
        let goto = async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        };
        match tokio::time::timeout(self.opts.nav_timeout, goto).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(CollectError::NavigationFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(CollectError::NavigationFailed {
                url: url.to_string(),
                reason: format!("timeout after {}s", self.opts.nav_timeout.as_secs()),
            }),
        }
    }

    /// Navigate with a single retry; a page that never loads twice is fatal
    /// for the current list.
    async fn navigate_with_retry(&self, url: &str) -> Result<()> {
        match self.navigate(url).await {
            Ok(()) => Ok(()),
            Err(CollectError::NavigationFailed { reason, .. }) => {
                warn!(url, reason = %reason, "Navigation failed, retrying once");
                self.navigate(url).await
            }
            Err(e) => Err(e),
        }
    }

    async fn content(&self) -> Result<String> {
        Ok(self.page.content().await?)
    }

    async fn page_height(&self) -> Result<f64> {
        let height: f64 = self
            .page
            .evaluate("document.body.scrollHeight")
            .await?
            .into_value()
            .map_err(|e| CollectError::Browser(e.to_string()))?;
        Ok(height)
    }

    async fn scroll_by(&self, offset: u32) -> Result<()> {
        self.page
            .evaluate(format!("window.scrollBy(0, {offset})"))
            .await?;
        Ok(())
    }

    /// Human-pacing delay: uniform draw from the configured range,
    /// interruptible by cancellation.
    async fn pace(&self) -> Result<()> {
        let min = self.opts.delay_min.as_millis() as u64;
        let max = (self.opts.delay_max.as_millis() as u64).max(min);
        let wait = Duration::from_millis(rand::rng().random_range(min..=max));
        debug!(wait_ms = wait.as_millis() as u64, "Pacing delay");
        tokio::select! {
            _ = tokio::time::sleep(wait) => Ok(()),
            _ = self.cancel.cancelled() => Err(CollectError::Cancelled),
        }
    }

    /// Poll until `ready` matches the page, a gate interstitial appears, or
    /// the render wait elapses. Returns the last captured document.
    async fn wait_for_render<F>(&self, context: &str, ready: F) -> Result<String>
    where
        F: Fn(&str) -> bool,
    {
        let started = Instant::now();
        loop {
            if self.cancel.is_cancelled() {
                return Err(CollectError::Cancelled);
            }
            let html = self.content().await?;
            if let Some(gate) = extract::detect_gate(&html) {
                return Err(self.gate_error(gate, context));
            }
            if ready(&html) || started.elapsed() >= RENDER_WAIT {
                return Ok(html);
            }
            tokio::select! {
                _ = tokio::time::sleep(RENDER_POLL) => {}
                _ = self.cancel.cancelled() => return Err(CollectError::Cancelled),
            }
        }
    }

    fn gate_error(&self, gate: Gate, context: &str) -> CollectError {
        match gate {
            Gate::Login => CollectError::SessionExpired,
            Gate::Blocked => CollectError::Blocked {
                url: context.to_string(),
            },
            Gate::NotFound => CollectError::NotFound(context.to_string()),
        }
    }
}

#[async_trait]
impl ListCollector for BrowserSession {
    async fn open_profile(&self, username: &str) -> Result<CollectedProfile> {
        let url = profile_url(&self.opts.base_url, username);
        self.navigate_with_retry(&url).await?;

        let html = self
            .wait_for_render(&url, |html| {
                let p = extract::parse_profile(html, username);
                p.account_id.is_some() || p.display_name.is_some()
            })
            .await?;

        let profile = extract::parse_profile(&html, username);
        info!(
            username,
            account_id = profile.account_id.as_deref().unwrap_or("?"),
            followers = profile.claimed_followers.unwrap_or(-1),
            following = profile.claimed_following.unwrap_or(-1),
            "Opened profile"
        );
        Ok(profile)
    }

    /// Scroll-to-exhaustion list collection. Terminates after
    /// `max_scroll_rounds` consecutive rounds without page growth.
    async fn collect_list(
        &self,
        username: &str,
        list_type: ListType,
    ) -> Result<(Vec<MemberRecord>, CollectionStats)> {
        let url = list_url(&self.opts.base_url, username, list_type);
        let started = Instant::now();
        self.navigate_with_retry(&url).await?;
        self.wait_for_render(&url, |html| !extract::parse_list_cells(html).is_empty())
            .await?;

        let mut discovered: Vec<MemberRecord> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut tracker =
            ScrollTracker::new(self.opts.max_scroll_rounds, self.page_height().await?);

        loop {
            if self.cancel.is_cancelled() {
                return Err(CollectError::Cancelled);
            }

            let html = self.content().await?;
            if let Some(gate) = extract::detect_gate(&html) {
                return Err(self.gate_error(gate, &url));
            }
            for record in extract::parse_list_cells(&html) {
                if seen.insert(record.account_id.clone()) {
                    discovered.push(record);
                }
            }
            debug!(
                list = %list_type,
                captured = discovered.len(),
                rounds = tracker.scroll_rounds,
                stagnant = tracker.stagnant_rounds,
                "Scroll round complete"
            );

            if tracker.exhausted() {
                break;
            }
            if tracker.scroll_rounds >= MAX_TOTAL_ROUNDS {
                warn!(list = %list_type, rounds = tracker.scroll_rounds, "Hit total scroll cap");
                break;
            }

            self.scroll_by(self.opts.scroll_offset_px).await?;
            self.pace().await?;
            tracker.observe(self.page_height().await?);
        }

        let mut stats = tracker.into_stats();
        stats.captured_count = discovered.len() as u32;
        info!(
            username,
            list = %list_type,
            captured = stats.captured_count,
            scroll_rounds = stats.scroll_rounds,
            stagnant_rounds = stats.stagnant_rounds,
            duration_s = started.elapsed().as_secs(),
            "List collection complete"
        );
        Ok((discovered, stats))
    }

    async fn probe_list(
        &self,
        username: &str,
        list_type: ListType,
        limit: usize,
    ) -> Result<Vec<MemberRecord>> {
        let url = list_url(&self.opts.base_url, username, list_type);
        self.navigate_with_retry(&url).await?;
        let html = self
            .wait_for_render(&url, |html| !extract::parse_list_cells(html).is_empty())
            .await?;
        let mut records = extract::parse_list_cells(&html);
        records.truncate(limit);
        Ok(records)
    }
}

/// Scroll-termination state. A list is exhausted after `max_stagnant`
/// consecutive rounds in which the page height did not grow; with
/// `max_stagnant = 0` the loop never scrolls and only the initially
/// rendered entries are captured.
struct ScrollTracker {
    max_stagnant: u32,
    consecutive_stagnant: u32,
    scroll_rounds: u32,
    stagnant_rounds: u32,
    last_height: f64,
}

impl ScrollTracker {
    fn new(max_stagnant: u32, initial_height: f64) -> Self {
        Self {
            max_stagnant,
            consecutive_stagnant: 0,
            scroll_rounds: 0,
            stagnant_rounds: 0,
            last_height: initial_height,
        }
    }

    fn exhausted(&self) -> bool {
        self.consecutive_stagnant >= self.max_stagnant
    }

    /// One scroll happened; compare the height it produced.
    fn observe(&mut self, height: f64) {
        self.scroll_rounds += 1;
        if height <= self.last_height {
            self.consecutive_stagnant += 1;
            self.stagnant_rounds += 1;
        } else {
            self.consecutive_stagnant = 0;
        }
        self.last_height = height;
    }

    fn into_stats(self) -> CollectionStats {
        CollectionStats {
            scroll_rounds: self.scroll_rounds,
            stagnant_rounds: self.stagnant_rounds,
            captured_count: 0,
        }
    }
}

fn profile_url(base: &str, username: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), username)
}

fn list_url(base: &str, username: &str, list_type: ListType) -> String {
    format!(
        "{}/{}/{}",
        base.trim_end_matches('/'),
        username,
        list_type.as_str()
    )
}
