use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use shadowgraph_common::{
    EdgeDirection, EdgeSummary, ErrorType, ListType, Provenance, ScrapeRunMetrics, ShadowAccount,
    ShadowEdge,
};

use crate::error::{is_transient, Result, StoreError};

const MAX_WRITE_ATTEMPTS: u32 = 5;
const RETRY_BASE: Duration = Duration::from_millis(100);
const RETRY_CAP: Duration = Duration::from_secs(2);

/// Durable store for shadow accounts, edges, and run metrics.
///
/// All writes are atomic per entity. Merge-upserts use explicit per-field
/// COALESCE so a null incoming field never clobbers an existing value.
#[derive(Clone)]
pub struct ShadowStore {
    pool: SqlitePool,
}

/// Parameters for an account insert-or-merge.
#[derive(Debug, Clone, Default)]
pub struct NewAccount {
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
    pub provenance: Option<Provenance>,
}

impl NewAccount {
    /// Minimal record for an account only known as a list entry so far.
    pub fn stub(account_id: &str, username: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            username: username.to_string(),
            provenance: Some(Provenance::Scrape),
            ..Default::default()
        }
    }
}

/// Parameters for an edge insert-or-touch.
#[derive(Debug, Clone)]
pub struct NewEdge {
    pub source_id: String,
    pub target_id: String,
    pub direction: EdgeDirection,
    pub list_type: ListType,
    pub seed_username: String,
    pub metadata: Option<serde_json::Value>,
}

/// Aggregate row counts, surfaced in the run summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    pub accounts: i64,
    pub edges: i64,
    pub metrics_rows: i64,
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    account_id: String,
    username: String,
    display_name: Option<String>,
    bio: Option<String>,
    location: Option<String>,
    website: Option<String>,
    profile_image_url: Option<String>,
    num_followers: Option<i64>,
    num_following: Option<i64>,
    num_tweets: Option<i64>,
    num_likes: Option<i64>,
    first_seen_at: DateTime<Utc>,
    last_updated_at: DateTime<Utc>,
    provenance: String,
}

impl AccountRow {
    fn into_account(self) -> Result<ShadowAccount> {
        let provenance = Provenance::from_str(&self.provenance)
            .map_err(|_| StoreError::Corrupt(format!("provenance '{}'", self.provenance)))?;
        Ok(ShadowAccount {
            account_id: self.account_id,
            username: self.username,
            display_name: self.display_name,
            bio: self.bio,
            location: self.location,
            website: self.website,
            profile_image_url: self.profile_image_url,
            num_followers: self.num_followers,
            num_following: self.num_following,
            num_tweets: self.num_tweets,
            num_likes: self.num_likes,
            first_seen_at: self.first_seen_at,
            last_updated_at: self.last_updated_at,
            provenance,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EdgeRow {
    source_id: String,
    target_id: String,
    direction: String,
    list_type: String,
    seed_username: String,
    captured_at: DateTime<Utc>,
    metadata_json: Option<String>,
}

impl EdgeRow {
    fn into_edge(self) -> Result<ShadowEdge> {
        let direction = EdgeDirection::from_str(&self.direction)
            .map_err(|_| StoreError::Corrupt(format!("direction '{}'", self.direction)))?;
        let list_type = ListType::from_str(&self.list_type)
            .map_err(|_| StoreError::Corrupt(format!("list_type '{}'", self.list_type)))?;
        let metadata = match self.metadata_json {
            Some(raw) => Some(
                serde_json::from_str(&raw)
                    .map_err(|e| StoreError::Corrupt(format!("edge metadata: {e}")))?,
            ),
            None => None,
        };
        Ok(ShadowEdge {
            source_id: self.source_id,
            target_id: self.target_id,
            direction,
            list_type,
            seed_username: self.seed_username,
            captured_at: self.captured_at,
            metadata,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MetricsRow {
    seed_id: String,
    list_type: String,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    captured_count: i64,
    claimed_count: Option<i64>,
    coverage_ratio: Option<f64>,
    scroll_rounds: i64,
    stagnant_rounds: i64,
    error_type: Option<String>,
    error_details: Option<String>,
    skipped: bool,
}

impl MetricsRow {
    fn into_metrics(self) -> Result<ScrapeRunMetrics> {
        let list_type = ListType::from_str(&self.list_type)
            .map_err(|_| StoreError::Corrupt(format!("list_type '{}'", self.list_type)))?;
        let error_type = match self.error_type {
            Some(raw) => Some(
                ErrorType::from_str(&raw)
                    .map_err(|_| StoreError::Corrupt(format!("error_type '{raw}'")))?,
            ),
            None => None,
        };
        Ok(ScrapeRunMetrics {
            seed_id: self.seed_id,
            list_type,
            started_at: self.started_at,
            completed_at: self.completed_at,
            captured_count: self.captured_count,
            claimed_count: self.claimed_count,
            coverage_ratio: self.coverage_ratio,
            scroll_rounds: self.scroll_rounds,
            stagnant_rounds: self.stagnant_rounds,
            error_type,
            error_details: self.error_details,
            skipped: self.skipped,
        })
    }
}

impl ShadowStore {
    /// Open (creating if missing) the store at `path` and run migrations.
    /// WAL mode lets readers proceed while a writer holds its short lock.
    pub async fn connect(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory store for tests. Single connection: each SQLite `:memory:`
    /// connection is its own database.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true).foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Insert or merge an account. For each nullable field the existing
    /// value survives a null incoming value (COALESCE). `first_seen_at` is
    /// set on insert only; `last_updated_at` never decreases. When an account
    /// seen from one source is merged from the other, provenance becomes
    /// `merged`. Returns the post-merge row.
    pub async fn upsert_account(&self, a: &NewAccount) -> Result<ShadowAccount> {
        let now = Utc::now();
        let provenance = a.provenance.unwrap_or(Provenance::Scrape);

        let row = with_retry("upsert_account", || async {
            sqlx::query_as::<_, AccountRow>(
                r#"
                INSERT INTO shadow_account
                    (account_id, username, display_name, bio, location, website,
                     profile_image_url, num_followers, num_following, num_tweets,
                     num_likes, first_seen_at, last_updated_at, provenance)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                ON CONFLICT (account_id) DO UPDATE SET
                    username          = excluded.username,
                    display_name      = COALESCE(excluded.display_name, shadow_account.display_name),
                    bio               = COALESCE(excluded.bio, shadow_account.bio),
                    location          = COALESCE(excluded.location, shadow_account.location),
                    website           = COALESCE(excluded.website, shadow_account.website),
                    profile_image_url = COALESCE(excluded.profile_image_url, shadow_account.profile_image_url),
                    num_followers     = COALESCE(excluded.num_followers, shadow_account.num_followers),
                    num_following     = COALESCE(excluded.num_following, shadow_account.num_following),
                    num_tweets        = COALESCE(excluded.num_tweets, shadow_account.num_tweets),
                    num_likes         = COALESCE(excluded.num_likes, shadow_account.num_likes),
                    last_updated_at   = MAX(excluded.last_updated_at, shadow_account.last_updated_at),
                    provenance        = CASE
                        WHEN shadow_account.provenance = excluded.provenance
                            THEN shadow_account.provenance
                        ELSE 'merged'
                    END
                RETURNING *
                "#,
            )
            .bind(&a.account_id)
            .bind(&a.username)
            .bind(&a.display_name)
            .bind(&a.bio)
            .bind(&a.location)
            .bind(&a.website)
            .bind(&a.profile_image_url)
            .bind(a.num_followers)
            .bind(a.num_following)
            .bind(a.num_tweets)
            .bind(a.num_likes)
            .bind(now)
            .bind(now)
            .bind(provenance.as_str())
            .fetch_one(&self.pool)
            .await
        })
        .await?;

        row.into_account()
    }

    /// Insert an edge or touch its `captured_at` (and metadata, when the new
    /// value is non-null). Never deletes.
    pub async fn upsert_edge(&self, e: &NewEdge) -> Result<()> {
        let now = Utc::now();
        let metadata_json = e.metadata.as_ref().map(|v| v.to_string());

        with_retry("upsert_edge", || async {
            sqlx::query(
                r#"
                INSERT INTO shadow_edge
                    (source_id, target_id, direction, list_type, seed_username,
                     captured_at, metadata_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT (source_id, target_id, direction, list_type) DO UPDATE SET
                    captured_at   = excluded.captured_at,
                    metadata_json = COALESCE(excluded.metadata_json, shadow_edge.metadata_json)
                "#,
            )
            .bind(&e.source_id)
            .bind(&e.target_id)
            .bind(e.direction.as_str())
            .bind(e.list_type.as_str())
            .bind(&e.seed_username)
            .bind(now)
            .bind(&metadata_json)
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await
    }

    /// Append one run-metrics row.
    pub async fn record_run_metrics(&self, m: &ScrapeRunMetrics) -> Result<()> {
        if m.skipped && (m.captured_count != 0 || m.error_type.is_some()) {
            return Err(StoreError::Invariant(
                "skipped run must have zero captures and no error".to_string(),
            ));
        }
        if let Some(ratio) = m.coverage_ratio {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(StoreError::Invariant(format!(
                    "coverage_ratio {ratio} outside [0, 1]"
                )));
            }
        }

        with_retry("record_run_metrics", || async {
            sqlx::query(
                r#"
                INSERT INTO shadow_run_metrics
                    (seed_id, list_type, started_at, completed_at, captured_count,
                     claimed_count, coverage_ratio, scroll_rounds, stagnant_rounds,
                     error_type, error_details, skipped)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
            )
            .bind(&m.seed_id)
            .bind(m.list_type.as_str())
            .bind(m.started_at)
            .bind(m.completed_at)
            .bind(m.captured_count)
            .bind(m.claimed_count)
            .bind(m.coverage_ratio)
            .bind(m.scroll_rounds)
            .bind(m.stagnant_rounds)
            .bind(m.error_type.map(|t| t.as_str()))
            .bind(&m.error_details)
            .bind(m.skipped)
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await
    }

    /// Most recent non-skipped metrics row for a (seed, list_type).
    pub async fn get_last_scrape_metrics(
        &self,
        seed_id: &str,
        list_type: ListType,
    ) -> Result<Option<ScrapeRunMetrics>> {
        let row = sqlx::query_as::<_, MetricsRow>(
            r#"
            SELECT seed_id, list_type, started_at, completed_at, captured_count,
                   claimed_count, coverage_ratio, scroll_rounds, stagnant_rounds,
                   error_type, error_details, skipped
            FROM shadow_run_metrics
            WHERE seed_id = ?1 AND list_type = ?2 AND skipped = 0
            ORDER BY completed_at DESC
            LIMIT 1
            "#,
        )
        .bind(seed_id)
        .bind(list_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(MetricsRow::into_metrics).transpose()
    }

    /// Edges observed from a seed's perspective, newest capture first.
    /// Outbound edges have the seed as source; inbound edges have it as
    /// target.
    pub async fn get_edges_for_seed(
        &self,
        seed_id: &str,
        direction: EdgeDirection,
    ) -> Result<Vec<ShadowEdge>> {
        let sql = match direction {
            EdgeDirection::Outbound => {
                r#"
                SELECT source_id, target_id, direction, list_type, seed_username,
                       captured_at, metadata_json
                FROM shadow_edge
                WHERE source_id = ?1 AND direction = 'outbound'
                ORDER BY captured_at DESC
                "#
            }
            EdgeDirection::Inbound => {
                r#"
                SELECT source_id, target_id, direction, list_type, seed_username,
                       captured_at, metadata_json
                FROM shadow_edge
                WHERE target_id = ?1 AND direction = 'inbound'
                ORDER BY captured_at DESC
                "#
            }
        };

        let rows = sqlx::query_as::<_, EdgeRow>(sql)
            .bind(seed_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(EdgeRow::into_edge).collect()
    }

    /// Follow/follower/reciprocal counts for one seed.
    pub async fn edge_summary(&self, seed_id: &str) -> Result<EdgeSummary> {
        let (following_count, followers_count, reciprocal_count) =
            sqlx::query_as::<_, (i64, i64, i64)>(
                r#"
                SELECT
                    COALESCE(SUM(CASE WHEN source_id = ?1 AND direction = 'outbound'
                                       AND list_type = 'following' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN target_id = ?1 AND direction = 'inbound'
                                       AND list_type = 'followers' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN target_id = ?1 AND direction = 'inbound'
                                       AND list_type = 'followers_you_follow' THEN 1 ELSE 0 END), 0)
                FROM shadow_edge
                WHERE source_id = ?1 OR target_id = ?1
                "#,
            )
            .bind(seed_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(EdgeSummary {
            following_count,
            followers_count,
            reciprocal_count,
        })
    }

    /// Case-insensitive handle lookup. Handles get reassigned over time, so
    /// the most recently updated match wins.
    pub async fn resolve_username(&self, username: &str) -> Result<Option<String>> {
        let id = sqlx::query_scalar::<_, String>(
            r#"
            SELECT account_id FROM shadow_account
            WHERE LOWER(username) = LOWER(?1)
            ORDER BY last_updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(username.trim().trim_start_matches('@'))
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn get_account(&self, account_id: &str) -> Result<Option<ShadowAccount>> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT * FROM shadow_account WHERE account_id = ?1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AccountRow::into_account).transpose()
    }

    /// Metrics rows completed at or after `since`, oldest first.
    pub async fn metrics_since(&self, since: DateTime<Utc>) -> Result<Vec<ScrapeRunMetrics>> {
        let rows = sqlx::query_as::<_, MetricsRow>(
            r#"
            SELECT seed_id, list_type, started_at, completed_at, captured_count,
                   claimed_count, coverage_ratio, scroll_rounds, stagnant_rounds,
                   error_type, error_details, skipped
            FROM shadow_run_metrics
            WHERE completed_at >= ?1
            ORDER BY completed_at ASC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MetricsRow::into_metrics).collect()
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let accounts = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM shadow_account")
            .fetch_one(&self.pool)
            .await?;
        let edges = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM shadow_edge")
            .fetch_one(&self.pool)
            .await?;
        let metrics_rows = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM shadow_run_metrics")
            .fetch_one(&self.pool)
            .await?;

        Ok(StoreStats {
            accounts,
            edges,
            metrics_rows,
        })
    }
}

/// Retry a write through brief lock contention with bounded exponential
/// backoff. Upserts are idempotent, so a retried statement that actually
/// committed cannot create duplicates.
async fn with_retry<T, F, Fut>(op: &'static str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut delay = RETRY_BASE;
    let mut attempt = 1u32;
    loop {
        match f().await {
            Ok(v) => {
                if attempt > 1 {
                    debug!(op, attempt, "Store write succeeded after retry");
                }
                return Ok(v);
            }
            Err(e) if is_transient(&e) && attempt < MAX_WRITE_ATTEMPTS => {
                warn!(op, attempt, error = %e, "Transient store error, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(RETRY_CAP);
                attempt += 1;
            }
            Err(e) => return Err(StoreError::Database(e)),
        }
    }
}
