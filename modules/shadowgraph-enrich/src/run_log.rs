//! Persisted JSON timeline of every action taken during a run.
//!
//! Each run produces a single `{DATA_DIR}/enrich-runs/{run_id}.json` file
//! containing an ordered list of events with timestamps.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use shadowgraph_common::ListType;

use crate::stats::EnrichStats;

pub struct RunLog {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    dir: PathBuf,
    events: Vec<RunEvent>,
    seq: u32,
}

#[derive(Serialize)]
struct RunEvent {
    seq: u32,
    ts: DateTime<Utc>,
    #[serde(flatten)]
    kind: EventKind,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    ProfileOpened {
        username: String,
        account_id: Option<String>,
        claimed_followers: Option<i64>,
        claimed_following: Option<i64>,
    },
    ProfileFailed {
        username: String,
        error: String,
    },
    PolicyDecision {
        seed: String,
        list_type: ListType,
        action: String,
        reason: String,
    },
    ConfirmationDeclined {
        seed: String,
    },
    ListCollected {
        seed: String,
        list_type: ListType,
        captured: u32,
        claimed: Option<i64>,
        scroll_rounds: u32,
        stagnant_rounds: u32,
    },
    ListFailed {
        seed: String,
        list_type: ListType,
        error: String,
    },
    BackfillBatch {
        requested: usize,
        returned: usize,
    },
    RunAborted {
        reason: String,
    },
}

#[derive(Serialize)]
struct RunLogDocument<'a> {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    stats: &'a EnrichStats,
    events: &'a [RunEvent],
}

impl RunLog {
    /// `dir` is the data root; the log lands in `{dir}/enrich-runs/`.
    pub fn new(dir: PathBuf) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            dir,
            events: Vec::new(),
            seq: 0,
        }
    }

    pub fn record(&mut self, kind: EventKind) {
        self.events.push(RunEvent {
            seq: self.seq,
            ts: Utc::now(),
            kind,
        });
        self.seq += 1;
    }

    /// Write the full timeline to disk. Called once, at the end of the run
    /// (including aborted runs).
    pub fn finish(&self, stats: &EnrichStats) -> Result<PathBuf> {
        let dir = self.dir.join("enrich-runs");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json", self.run_id));

        let doc = RunLogDocument {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            stats,
            events: &self.events,
        };
        std::fs::write(&path, serde_json::to_vec_pretty(&doc)?)?;
        info!(path = %path.display(), events = self.events.len(), "Run log written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_log_round_trips_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RunLog::new(dir.path().to_path_buf());
        log.record(EventKind::ProfileOpened {
            username: "alice".to_string(),
            account_id: Some("1".to_string()),
            claimed_followers: Some(100),
            claimed_following: Some(50),
        });
        log.record(EventKind::RunAborted {
            reason: "blocked".to_string(),
        });

        let path = log.finish(&EnrichStats::default()).unwrap();
        let raw = std::fs::read_to_string(path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["events"].as_array().unwrap().len(), 2);
        assert_eq!(doc["events"][0]["type"], "profile_opened");
        assert_eq!(doc["events"][1]["seq"], 1);
    }
}
