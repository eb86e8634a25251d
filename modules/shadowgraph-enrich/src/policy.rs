//! Refresh policy evaluation. Pure: no I/O, deterministic, and trivially
//! testable. The coordinator fetches last-run metrics and passes them in.

use chrono::{DateTime, Duration, Utc};

use shadowgraph_common::{EnrichmentPolicy, ListType, ScrapeRunMetrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Refresh,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// No non-skipped run on record for this list.
    NeverScraped,
    /// Last run is older than `max_age_days`.
    Stale,
    /// Claimed count moved more than `delta_threshold_pct`.
    DeltaExceeded,
    /// Recent run and the claimed count barely moved.
    Fresh,
    /// The confirmation gate overrode a refresh.
    Declined,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::NeverScraped => "never scraped",
            Reason::Stale => "stale",
            Reason::DeltaExceeded => "delta exceeded",
            Reason::Fresh => "fresh, within delta",
            Reason::Declined => "declined",
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ListDecision {
    pub list_type: ListType,
    pub action: Action,
    pub reason: Reason,
}

/// Decide whether one list is due for a scrape.
pub fn evaluate(
    list_type: ListType,
    current_claimed: Option<i64>,
    last: Option<&ScrapeRunMetrics>,
    policy: &EnrichmentPolicy,
    now: DateTime<Utc>,
) -> ListDecision {
    let Some(last) = last else {
        return ListDecision {
            list_type,
            action: Action::Refresh,
            reason: Reason::NeverScraped,
        };
    };

    if now - last.completed_at > Duration::days(policy.max_age_days as i64) {
        return ListDecision {
            list_type,
            action: Action::Refresh,
            reason: Reason::Stale,
        };
    }

    if let (Some(current), Some(last_claimed)) = (current_claimed, last.claimed_count) {
        let delta_pct =
            (current - last_claimed).abs() as f64 / last_claimed.max(1) as f64 * 100.0;
        if delta_pct > policy.delta_threshold_pct {
            return ListDecision {
                list_type,
                action: Action::Refresh,
                reason: Reason::DeltaExceeded,
            };
        }
    }

    ListDecision {
        list_type,
        action: Action::Skip,
        reason: Reason::Fresh,
    }
}

/// Confirmation gate declined: every refresh becomes a skip for this seed.
pub fn decline_all(decisions: &mut [ListDecision]) {
    for d in decisions.iter_mut() {
        if d.action == Action::Refresh {
            d.action = Action::Skip;
            d.reason = Reason::Declined;
        }
    }
}
