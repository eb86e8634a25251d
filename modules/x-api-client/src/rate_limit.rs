use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ApiError, Result};

/// Default window matching the platform's per-15-minute quota buckets.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(900);
pub const DEFAULT_MAX_REQUESTS: usize = 15;

#[derive(Debug, Serialize, Deserialize, Default)]
struct LimiterState {
    timestamps: Vec<DateTime<Utc>>,
}

/// Sliding-window rate limiter whose request timestamps survive process
/// restarts. State is rewritten via temp-file-plus-rename after every
/// acquire, so readers always see a complete snapshot and a crash can lose
/// at most the most recent grant.
pub struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    state_path: PathBuf,
    timestamps: Mutex<VecDeque<DateTime<Utc>>>,
}

impl SlidingWindowLimiter {
    /// Restore limiter state from `state_path` (missing file means a fresh
    /// window). Timestamps older than the window are discarded on load.
    pub fn load(state_path: &Path, max_requests: usize, window: Duration) -> Result<Self> {
        let mut timestamps = VecDeque::new();
        match std::fs::read_to_string(state_path) {
            Ok(raw) => {
                let state: LimiterState = serde_json::from_str(&raw)
                    .map_err(|e| ApiError::State(format!("parsing {}: {e}", state_path.display())))?;
                let cutoff = Utc::now()
                    - chrono::Duration::from_std(window)
                        .map_err(|e| ApiError::State(e.to_string()))?;
                timestamps.extend(state.timestamps.into_iter().filter(|t| *t > cutoff));
                debug!(
                    path = %state_path.display(),
                    restored = timestamps.len(),
                    "Restored rate-limiter state"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ApiError::State(format!(
                    "reading {}: {e}",
                    state_path.display()
                )))
            }
        }

        Ok(Self {
            max_requests,
            window,
            state_path: state_path.to_path_buf(),
            timestamps: Mutex::new(timestamps),
        })
    }

    /// Block until a request slot is free within the window, then record it
    /// and persist. The wait is cancellation-aware.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        let mut stamps = self.timestamps.lock().await;
        loop {
            let now = Utc::now();
            let cutoff = now
                - chrono::Duration::from_std(self.window)
                    .map_err(|e| ApiError::State(e.to_string()))?;
            while stamps.front().is_some_and(|t| *t <= cutoff) {
                stamps.pop_front();
            }

            if stamps.len() < self.max_requests {
                stamps.push_back(now);
                self.persist(&stamps)?;
                return Ok(());
            }

            // Full window: wait for the oldest timestamp to age out.
            let Some(&oldest) = stamps.front() else {
                continue;
            };
            let ready_at = oldest
                + chrono::Duration::from_std(self.window)
                    .map_err(|e| ApiError::State(e.to_string()))?;
            let wait = (ready_at - now)
                .to_std()
                .unwrap_or(Duration::from_millis(10))
                .max(Duration::from_millis(10));
            debug!(wait_ms = wait.as_millis() as u64, "Rate limit window full, waiting");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
            }
        }
    }

    /// Write the current window to disk (used on shutdown; `acquire` already
    /// persists after each grant).
    pub async fn flush(&self) -> Result<()> {
        let stamps = self.timestamps.lock().await;
        self.persist(&stamps)
    }

    fn persist(&self, stamps: &VecDeque<DateTime<Utc>>) -> Result<()> {
        let state = LimiterState {
            timestamps: stamps.iter().copied().collect(),
        };
        let dir = self
            .state_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .map_err(|e| ApiError::State(format!("creating {}: {e}", dir.display())))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| ApiError::State(format!("temp file in {}: {e}", dir.display())))?;
        serde_json::to_writer(&mut tmp, &state).map_err(|e| ApiError::State(e.to_string()))?;
        tmp.flush().map_err(|e| ApiError::State(e.to_string()))?;
        tmp.persist(&self.state_path).map_err(|e| {
            warn!(path = %self.state_path.display(), error = %e, "Failed to persist limiter state");
            ApiError::State(e.to_string())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn state_file(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("rate-limit.json")
    }

    #[tokio::test]
    async fn acquires_up_to_limit_without_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let limiter =
            SlidingWindowLimiter::load(&state_file(&dir), 3, Duration::from_secs(60)).unwrap();
        let cancel = CancellationToken::new();

        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire(&cancel).await.unwrap();
        }
        assert!(
            start.elapsed() < Duration::from_millis(250),
            "acquires under the limit must not block"
        );
    }

    #[tokio::test]
    async fn blocks_when_window_is_full() {
        let dir = tempfile::tempdir().unwrap();
        let limiter =
            SlidingWindowLimiter::load(&state_file(&dir), 2, Duration::from_millis(400)).unwrap();
        let cancel = CancellationToken::new();

        limiter.acquire(&cancel).await.unwrap();
        limiter.acquire(&cancel).await.unwrap();

        let start = Instant::now();
        limiter.acquire(&cancel).await.unwrap();
        assert!(
            start.elapsed() >= Duration::from_millis(200),
            "third acquire should wait for the window to slide"
        );
    }

    #[tokio::test]
    async fn state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_file(&dir);
        let window = Duration::from_secs(60);
        let cancel = CancellationToken::new();

        {
            let limiter = SlidingWindowLimiter::load(&path, 3, window).unwrap();
            limiter.acquire(&cancel).await.unwrap();
            limiter.acquire(&cancel).await.unwrap();
        }

        // New process: one slot left, the next must be immediate, the one
        // after must block.
        let limiter = SlidingWindowLimiter::load(&path, 3, window).unwrap();
        let start = Instant::now();
        limiter.acquire(&cancel).await.unwrap();
        assert!(
            start.elapsed() < Duration::from_millis(250),
            "restored window had a free slot"
        );

        let blocked =
            tokio::time::timeout(Duration::from_millis(100), limiter.acquire(&cancel)).await;
        assert!(
            blocked.is_err(),
            "fourth acquire within the window must block across restart"
        );
    }

    #[tokio::test]
    async fn window_never_exceeds_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_file(&dir);
        let window = Duration::from_millis(300);
        let limiter = SlidingWindowLimiter::load(&path, 2, window).unwrap();
        let cancel = CancellationToken::new();

        let mut grant_times = Vec::new();
        for _ in 0..6 {
            limiter.acquire(&cancel).await.unwrap();
            grant_times.push(Instant::now());
        }

        for pair in grant_times.windows(3) {
            let span = pair[2].duration_since(pair[0]);
            assert!(
                span >= window.mul_f64(0.9),
                "3 grants inside one window would exceed the limit of 2"
            );
        }
    }

    #[tokio::test]
    async fn cancelled_acquire_returns_promptly() {
        let dir = tempfile::tempdir().unwrap();
        let limiter =
            SlidingWindowLimiter::load(&state_file(&dir), 1, Duration::from_secs(600)).unwrap();
        let cancel = CancellationToken::new();

        limiter.acquire(&cancel).await.unwrap();

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });

        let start = Instant::now();
        let err = limiter.acquire(&cancel).await;
        assert!(matches!(err, Err(ApiError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn corrupt_state_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_file(&dir);
        std::fs::write(&path, "not json").unwrap();
        let result = SlidingWindowLimiter::load(&path, 3, Duration::from_secs(60));
        assert!(result.is_err());
    }
}
