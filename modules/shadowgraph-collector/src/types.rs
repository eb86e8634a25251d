use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Profile record extracted from a rendered profile page.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectedProfile {
    /// Numeric platform id; absent when the markup exposed neither the
    /// embedded schema nor a follow button.
    pub account_id: Option<String>,
    pub username: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub profile_image_url: Option<String>,
    pub claimed_followers: Option<i64>,
    pub claimed_following: Option<i64>,
    pub claimed_tweets: Option<i64>,
}

/// One entry extracted from a follow list.
#[derive(Debug, Clone, Serialize)]
pub struct MemberRecord {
    pub account_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
}

/// Per-list collection statistics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CollectionStats {
    pub scroll_rounds: u32,
    pub stagnant_rounds: u32,
    pub captured_count: u32,
}

/// Session and pacing configuration for the collector.
#[derive(Debug, Clone)]
pub struct CollectorOptions {
    pub base_url: String,
    pub chrome_binary: Option<PathBuf>,
    pub headless: bool,
    pub cookies_path: Option<PathBuf>,
    /// Consecutive unchanged-height rounds before a list is considered
    /// exhausted.
    pub max_scroll_rounds: u32,
    /// Uniform human-pacing delay range between scrolls.
    pub delay_min: Duration,
    pub delay_max: Duration,
    pub nav_timeout: Duration,
    pub scroll_offset_px: u32,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            base_url: "https://x.com".to_string(),
            chrome_binary: None,
            headless: true,
            cookies_path: None,
            max_scroll_rounds: 6,
            delay_min: Duration::from_secs(4),
            delay_max: Duration::from_secs(9),
            nav_timeout: Duration::from_secs(30),
            scroll_offset_px: 1200,
        }
    }
}
