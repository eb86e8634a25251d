//! Error classification and aggregate reporting over run metrics.
//! Stateless: classification is a substring predicate table, aggregates are
//! computed over rows the caller fetched from the store.

use std::collections::HashMap;

use shadowgraph_common::{ErrorType, ScrapeRunMetrics};

/// Map a raw error string to the metrics taxonomy. First match wins, so the
/// more specific predicates sit above the generic ones.
pub fn classify_error(raw: &str) -> ErrorType {
    let lowered = raw.to_lowercase();
    const RULES: &[(&str, ErrorType)] = &[
        ("blocked", ErrorType::Blocked),
        ("anti-automation", ErrorType::Blocked),
        ("session expired", ErrorType::Session),
        ("login", ErrorType::Session),
        ("cookie", ErrorType::Session),
        ("cancelled", ErrorType::Interrupted),
        ("interrupted", ErrorType::Interrupted),
        ("navigation failed", ErrorType::Navigation),
        ("rate limit", ErrorType::RateLimit),
        ("unauthorized", ErrorType::ApiHttp),
        ("malformed response", ErrorType::ApiDecode),
        ("decode", ErrorType::ApiDecode),
        ("transient server", ErrorType::ApiHttp),
        ("server error", ErrorType::ApiHttp),
        ("timed out", ErrorType::Timeout),
        ("timeout", ErrorType::Timeout),
        ("selector", ErrorType::DomParse),
        ("corrupt row", ErrorType::DomParse),
        ("browser error", ErrorType::Navigation),
    ];

    for (needle, kind) in RULES {
        if lowered.contains(needle) {
            return *kind;
        }
    }
    ErrorType::Unknown
}

/// Aggregates over a window of metrics rows.
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub rows: usize,
    pub seeds: usize,
    pub skipped: usize,
    /// Non-skipped rows that finished without an error.
    pub success_rate: f64,
    /// Mean coverage over rows that have a ratio.
    pub mean_coverage: f64,
    pub error_histogram: HashMap<ErrorType, usize>,
}

pub fn summarize(rows: &[ScrapeRunMetrics]) -> MetricsSummary {
    let mut summary = MetricsSummary {
        rows: rows.len(),
        ..Default::default()
    };

    let mut seeds: Vec<&str> = rows.iter().map(|r| r.seed_id.as_str()).collect();
    seeds.sort_unstable();
    seeds.dedup();
    summary.seeds = seeds.len();

    let mut attempted = 0usize;
    let mut succeeded = 0usize;
    let mut coverage_sum = 0f64;
    let mut coverage_n = 0usize;

    for row in rows {
        if row.skipped {
            summary.skipped += 1;
            continue;
        }
        attempted += 1;
        match row.error_type {
            Some(kind) => *summary.error_histogram.entry(kind).or_default() += 1,
            None => succeeded += 1,
        }
        if let Some(ratio) = row.coverage_ratio {
            coverage_sum += ratio;
            coverage_n += 1;
        }
    }

    if attempted > 0 {
        summary.success_rate = succeeded as f64 / attempted as f64;
    }
    if coverage_n > 0 {
        summary.mean_coverage = coverage_sum / coverage_n as f64;
    }
    summary
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "rows:          {}", self.rows)?;
        writeln!(f, "seeds:         {}", self.seeds)?;
        writeln!(f, "skipped:       {}", self.skipped)?;
        writeln!(f, "success rate:  {:.1}%", self.success_rate * 100.0)?;
        writeln!(f, "mean coverage: {:.1}%", self.mean_coverage * 100.0)?;
        if !self.error_histogram.is_empty() {
            writeln!(f, "errors:")?;
            let mut entries: Vec<_> = self.error_histogram.iter().collect();
            entries.sort_by(|a, b| b.1.cmp(a.1).then(a.0.as_str().cmp(b.0.as_str())));
            for (kind, count) in entries {
                writeln!(f, "  {}: {}", kind, count)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shadowgraph_common::ListType;

    #[test]
    fn classification_table() {
        assert_eq!(
            classify_error("Blocked by anti-automation gate at https://x.com/a/followers"),
            ErrorType::Blocked
        );
        assert_eq!(
            classify_error("Session expired: redirected to login"),
            ErrorType::Session
        );
        assert_eq!(
            classify_error("Navigation failed for https://x.com/a: timeout after 30s"),
            ErrorType::Navigation
        );
        assert_eq!(classify_error("Rate limited (retry after Some(30)s)"), ErrorType::RateLimit);
        assert_eq!(classify_error("Unauthorized (status 403)"), ErrorType::ApiHttp);
        assert_eq!(
            classify_error("Malformed response: missing field `data`"),
            ErrorType::ApiDecode
        );
        assert_eq!(
            classify_error("Transient server error (status Some(503)): upstream"),
            ErrorType::ApiHttp
        );
        assert_eq!(classify_error("operation timed out"), ErrorType::Timeout);
        assert_eq!(classify_error("Cancelled"), ErrorType::Interrupted);
        assert_eq!(classify_error("weird unheard-of failure"), ErrorType::Unknown);
    }

    fn row(seed: &str, skipped: bool, error: Option<ErrorType>, coverage: Option<f64>) -> ScrapeRunMetrics {
        let now = Utc::now();
        ScrapeRunMetrics {
            seed_id: seed.to_string(),
            list_type: ListType::Following,
            started_at: now,
            completed_at: now,
            captured_count: if skipped { 0 } else { 10 },
            claimed_count: None,
            coverage_ratio: coverage,
            scroll_rounds: 0,
            stagnant_rounds: 0,
            error_type: error,
            error_details: None,
            skipped,
        }
    }

    #[test]
    fn summary_aggregates() {
        let rows = vec![
            row("a", false, None, Some(0.9)),
            row("a", false, None, Some(0.7)),
            row("b", false, Some(ErrorType::Blocked), None),
            row("c", true, None, None),
        ];
        let s = summarize(&rows);
        assert_eq!(s.rows, 4);
        assert_eq!(s.seeds, 3);
        assert_eq!(s.skipped, 1);
        assert!((s.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((s.mean_coverage - 0.8).abs() < 1e-9);
        assert_eq!(s.error_histogram[&ErrorType::Blocked], 1);
    }

    #[test]
    fn empty_window() {
        let s = summarize(&[]);
        assert_eq!(s.rows, 0);
        assert_eq!(s.success_rate, 0.0);
        assert_eq!(s.mean_coverage, 0.0);
    }
}
