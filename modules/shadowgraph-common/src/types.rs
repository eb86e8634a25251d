use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ShadowError;

/// Which follow list a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListType {
    Following,
    Followers,
    FollowersYouFollow,
}

impl ListType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListType::Following => "following",
            ListType::Followers => "followers",
            ListType::FollowersYouFollow => "followers_you_follow",
        }
    }

    /// All list types, in the order the coordinator attempts them.
    pub fn all() -> [ListType; 3] {
        [
            ListType::Following,
            ListType::Followers,
            ListType::FollowersYouFollow,
        ]
    }

    /// The edge direction implied by this list: a following list yields
    /// seed→member edges, both follower views yield member→seed edges.
    pub fn direction(&self) -> EdgeDirection {
        match self {
            ListType::Following => EdgeDirection::Outbound,
            ListType::Followers | ListType::FollowersYouFollow => EdgeDirection::Inbound,
        }
    }
}

impl fmt::Display for ListType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListType {
    type Err = ShadowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "following" => Ok(ListType::Following),
            "followers" => Ok(ListType::Followers),
            "followers_you_follow" => Ok(ListType::FollowersYouFollow),
            other => Err(ShadowError::Validation(format!(
                "unknown list type: {other}"
            ))),
        }
    }
}

/// Direction of a follow edge relative to its source account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeDirection {
    /// source follows target, observed from the source's following list.
    Outbound,
    /// source follows target, observed from the target's follower list.
    Inbound,
}

impl EdgeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeDirection::Outbound => "outbound",
            EdgeDirection::Inbound => "inbound",
        }
    }
}

impl fmt::Display for EdgeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeDirection {
    type Err = ShadowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "outbound" => Ok(EdgeDirection::Outbound),
            "inbound" => Ok(EdgeDirection::Inbound),
            other => Err(ShadowError::Validation(format!(
                "unknown edge direction: {other}"
            ))),
        }
    }
}

/// Where an account record's fields came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Scrape,
    Api,
    Merged,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Scrape => "scrape",
            Provenance::Api => "api",
            Provenance::Merged => "merged",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provenance {
    type Err = ShadowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scrape" => Ok(Provenance::Scrape),
            "api" => Ok(Provenance::Api),
            "merged" => Ok(Provenance::Merged),
            other => Err(ShadowError::Validation(format!(
                "unknown provenance: {other}"
            ))),
        }
    }
}

/// Classified failure kind recorded in run metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Navigation,
    Blocked,
    Session,
    DomParse,
    RateLimit,
    Timeout,
    ApiHttp,
    ApiDecode,
    Interrupted,
    Unknown,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Navigation => "navigation",
            ErrorType::Blocked => "blocked",
            ErrorType::Session => "session",
            ErrorType::DomParse => "dom_parse",
            ErrorType::RateLimit => "rate_limit",
            ErrorType::Timeout => "timeout",
            ErrorType::ApiHttp => "api_http",
            ErrorType::ApiDecode => "api_decode",
            ErrorType::Interrupted => "interrupted",
            ErrorType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorType {
    type Err = ShadowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "navigation" => Ok(ErrorType::Navigation),
            "blocked" => Ok(ErrorType::Blocked),
            "session" => Ok(ErrorType::Session),
            "dom_parse" => Ok(ErrorType::DomParse),
            "rate_limit" => Ok(ErrorType::RateLimit),
            "timeout" => Ok(ErrorType::Timeout),
            "api_http" => Ok(ErrorType::ApiHttp),
            "api_decode" => Ok(ErrorType::ApiDecode),
            "interrupted" => Ok(ErrorType::Interrupted),
            "unknown" => Ok(ErrorType::Unknown),
            other => Err(ShadowError::Validation(format!(
                "unknown error type: {other}"
            ))),
        }
    }
}

/// A profile observed by scraping or the API. `account_id` is authoritative;
/// `username` is the mutable handle and may be claimed by a different account
/// later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowAccount {
    pub account_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub profile_image_url: Option<String>,
    pub num_followers: Option<i64>,
    pub num_following: Option<i64>,
    pub num_tweets: Option<i64>,
    pub num_likes: Option<i64>,
    pub first_seen_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub provenance: Provenance,
}

/// A directional follow relationship between two shadow accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowEdge {
    pub source_id: String,
    pub target_id: String,
    pub direction: EdgeDirection,
    pub list_type: ListType,
    /// The seed whose scrape produced this edge.
    pub seed_username: String,
    pub captured_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

/// One row per (seed, list_type, run). Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRunMetrics {
    pub seed_id: String,
    pub list_type: ListType,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub captured_count: i64,
    /// The seed's advertised count at scrape time, when known.
    pub claimed_count: Option<i64>,
    pub coverage_ratio: Option<f64>,
    pub scroll_rounds: i64,
    pub stagnant_rounds: i64,
    pub error_type: Option<ErrorType>,
    pub error_details: Option<String>,
    pub skipped: bool,
}

/// Edge aggregates for one seed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeSummary {
    pub following_count: i64,
    pub followers_count: i64,
    pub reciprocal_count: i64,
}

/// Refresh policy configuration. Not persisted per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentPolicy {
    /// Last runs older than this are refreshed unconditionally.
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
    /// Claimed-count change (percent) above which a refresh is forced.
    #[serde(default = "default_delta_threshold_pct")]
    pub delta_threshold_pct: f64,
    #[serde(default)]
    pub require_confirmation: bool,
    #[serde(default = "default_list_types")]
    pub list_types: Vec<ListType>,
}

fn default_max_age_days() -> u32 {
    180
}

fn default_delta_threshold_pct() -> f64 {
    50.0
}

fn default_list_types() -> Vec<ListType> {
    ListType::all().to_vec()
}

impl Default for EnrichmentPolicy {
    fn default() -> Self {
        Self {
            max_age_days: default_max_age_days(),
            delta_threshold_pct: default_delta_threshold_pct(),
            require_confirmation: false,
            list_types: default_list_types(),
        }
    }
}

impl EnrichmentPolicy {
    /// Load from a JSON policy file and validate field ranges.
    pub fn from_file(path: &Path) -> Result<Self, ShadowError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ShadowError::Config(format!("reading {}: {e}", path.display())))?;
        let policy: EnrichmentPolicy = serde_json::from_str(&raw)
            .map_err(|e| ShadowError::Config(format!("parsing {}: {e}", path.display())))?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), ShadowError> {
        if self.max_age_days < 1 {
            return Err(ShadowError::Config(
                "max_age_days must be >= 1".to_string(),
            ));
        }
        if !(0.0..=1000.0).contains(&self.delta_threshold_pct) {
            return Err(ShadowError::Config(
                "delta_threshold_pct must be in [0, 1000]".to_string(),
            ));
        }
        if self.list_types.is_empty() {
            return Err(ShadowError::Config(
                "list_types must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Canonical form of a handle for lookups: lowercase, no leading `@`.
/// Original case is preserved in storage; only comparisons normalize.
pub fn normalize_username(username: &str) -> String {
    username.trim().trim_start_matches('@').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_type_round_trips_through_str() {
        for lt in ListType::all() {
            assert_eq!(lt.as_str().parse::<ListType>().unwrap(), lt);
        }
    }

    #[test]
    fn list_type_implies_direction() {
        assert_eq!(ListType::Following.direction(), EdgeDirection::Outbound);
        assert_eq!(ListType::Followers.direction(), EdgeDirection::Inbound);
        assert_eq!(
            ListType::FollowersYouFollow.direction(),
            EdgeDirection::Inbound
        );
    }

    #[test]
    fn normalize_strips_at_and_case() {
        assert_eq!(normalize_username("@Alice"), "alice");
        assert_eq!(normalize_username("  Bob_99 "), "bob_99");
        assert_eq!(normalize_username("carol"), "carol");
    }

    #[test]
    fn policy_defaults() {
        let p = EnrichmentPolicy::default();
        assert_eq!(p.max_age_days, 180);
        assert_eq!(p.delta_threshold_pct, 50.0);
        assert!(!p.require_confirmation);
        assert_eq!(p.list_types.len(), 3);
    }

    #[test]
    fn policy_validation_rejects_out_of_range() {
        let mut p = EnrichmentPolicy::default();
        p.max_age_days = 0;
        assert!(p.validate().is_err());

        let mut p = EnrichmentPolicy::default();
        p.delta_threshold_pct = 1500.0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn policy_file_defaults_missing_fields() {
        let p: EnrichmentPolicy = serde_json::from_str(r#"{"max_age_days": 30}"#).unwrap();
        assert_eq!(p.max_age_days, 30);
        assert_eq!(p.delta_threshold_pct, 50.0);
        assert_eq!(p.list_types.len(), 3);
    }
}
