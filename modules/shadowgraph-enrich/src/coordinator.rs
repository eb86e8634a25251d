//! End-to-end per-seed orchestration: profile → policy → collection →
//! persistence → metrics, then one API backfill drain at the end of the run.
//!
//! Seeds run strictly sequentially; the browser session is a single shared
//! resource and the scraped service is sensitive to concurrent load from one
//! identity.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use shadowgraph_collector::{
    CollectError, CollectedProfile, CollectionStats, ListCollector, MemberRecord,
};
use shadowgraph_common::{
    EdgeDirection, EnrichmentPolicy, ErrorType, ListType, Provenance, ScrapeRunMetrics,
};
use shadowgraph_store::{NewAccount, NewEdge, ShadowStore};
use x_api_client::{ApiProfile, XApiClient, MAX_BATCH};

use crate::metrics::classify_error;
use crate::policy::{self, Action, ListDecision};
use crate::run_log::{EventKind, RunLog};
use crate::stats::EnrichStats;

/// Entries shown to the confirmation callback from the quick probe.
const PROBE_LIMIT: usize = 10;

/// Payload handed to the confirmation callback before scraping a seed.
pub struct ConfirmPreview {
    pub profile: CollectedProfile,
    pub decisions: Vec<ListDecision>,
    /// Coverage ratio of the last non-skipped run per list, when one exists.
    pub last_coverage: Vec<(ListType, Option<f64>)>,
    /// Sample of the seed's following list, when a quick probe succeeded.
    pub probe: Vec<MemberRecord>,
}

pub type ConfirmFn = Box<dyn Fn(&ConfirmPreview) -> bool + Send + Sync>;

/// Worst outcome class observed; maps onto the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    Success,
    Partial,
    Aborted,
}

impl ExitClass {
    pub fn code(&self) -> u8 {
        match self {
            ExitClass::Success => 0,
            ExitClass::Partial => 1,
            ExitClass::Aborted => 2,
        }
    }
}

pub struct RunReport {
    pub stats: EnrichStats,
    pub exit: ExitClass,
}

enum SeedFlow {
    Done,
    Abort { reason: String },
}

pub struct Coordinator {
    store: ShadowStore,
    collector: Arc<dyn ListCollector>,
    api: Option<Arc<XApiClient>>,
    policy: EnrichmentPolicy,
    confirm: Option<ConfirmFn>,
    auto_confirm_first: bool,
    cancel: CancellationToken,
    run_log: Option<RunLog>,
}

impl Coordinator {
    pub fn new(
        store: ShadowStore,
        collector: Arc<dyn ListCollector>,
        policy: EnrichmentPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            collector,
            api: None,
            policy,
            confirm: None,
            auto_confirm_first: false,
            cancel,
            run_log: None,
        }
    }

    /// Enable API backfill of profiles discovered without a bio.
    pub fn with_api(mut self, api: Arc<XApiClient>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn with_confirm(mut self, confirm: ConfirmFn) -> Self {
        self.confirm = Some(confirm);
        self
    }

    pub fn with_auto_confirm_first(mut self, auto: bool) -> Self {
        self.auto_confirm_first = auto;
        self
    }

    pub fn with_run_log(mut self, run_log: RunLog) -> Self {
        self.run_log = Some(run_log);
        self
    }

    pub async fn run(&mut self, seeds: &[String]) -> Result<RunReport> {
        info!(seeds = seeds.len(), "Starting enrichment run");
        let mut stats = EnrichStats::default();
        let mut backfill: Vec<String> = Vec::new();
        let mut aborted = false;

        for (index, seed) in seeds.iter().enumerate() {
            if self.cancel.is_cancelled() {
                self.log(EventKind::RunAborted {
                    reason: "interrupted".to_string(),
                });
                aborted = true;
                break;
            }

            stats.seeds_attempted += 1;
            match self.process_seed(index, seed, &mut stats, &mut backfill).await? {
                SeedFlow::Done => {}
                SeedFlow::Abort { reason } => {
                    error!(seed, reason = %reason, "Aborting run");
                    self.log(EventKind::RunAborted { reason });
                    aborted = true;
                    break;
                }
            }
        }

        if !aborted {
            self.drain_backfill(&mut stats, backfill).await?;
        }

        let exit = if aborted {
            ExitClass::Aborted
        } else if stats.seeds_failed > 0 || stats.lists_failed > 0 {
            ExitClass::Partial
        } else {
            ExitClass::Success
        };

        if let Some(run_log) = &self.run_log {
            if let Err(e) = run_log.finish(&stats) {
                warn!(error = %e, "Failed to write run log");
            }
        }

        info!("{stats}");
        Ok(RunReport { stats, exit })
    }

    /// One seed, start to finish. Metrics rows for the seed are buffered and
    /// flushed after all its lists settle, also on the abort path.
    async fn process_seed(
        &mut self,
        index: usize,
        seed: &str,
        stats: &mut EnrichStats,
        backfill: &mut Vec<String>,
    ) -> Result<SeedFlow> {
        let mut rows: Vec<ScrapeRunMetrics> = Vec::new();
        let flow = self
            .process_seed_inner(index, seed, stats, backfill, &mut rows)
            .await;
        for row in &rows {
            self.store.record_run_metrics(row).await?;
        }
        flow
    }

    async fn process_seed_inner(
        &mut self,
        index: usize,
        seed: &str,
        stats: &mut EnrichStats,
        backfill: &mut Vec<String>,
        rows: &mut Vec<ScrapeRunMetrics>,
    ) -> Result<SeedFlow> {
        info!(seed, "Processing seed");
        let first_list = self
            .policy
            .list_types
            .first()
            .copied()
            .unwrap_or(ListType::Following);

        // 1. Profile open. Seed-level failures leave one error row and move
        // on; gates abort the whole run.
        let profile = match self.collector.open_profile(seed).await {
            Ok(profile) => profile,
            Err(e) => {
                let details = e.to_string();
                let seed_id = self.fallback_seed_id(seed).await;
                rows.push(error_row(&seed_id, first_list, &details));
                self.log(EventKind::ProfileFailed {
                    username: seed.to_string(),
                    error: details.clone(),
                });
                stats.seeds_failed += 1;
                if e.aborts_run() || matches!(e, CollectError::Cancelled) {
                    return Ok(SeedFlow::Abort { reason: details });
                }
                warn!(seed, error = %details, "Profile open failed, continuing");
                return Ok(SeedFlow::Done);
            }
        };

        let Some(seed_account_id) = (match profile.account_id.clone() {
            Some(id) => Some(id),
            None => self.store.resolve_username(seed).await?,
        }) else {
            let details = format!("no account id extractable for {seed}");
            let seed_id = self.fallback_seed_id(seed).await;
            rows.push(error_row_typed(
                &seed_id,
                first_list,
                ErrorType::DomParse,
                &details,
            ));
            self.log(EventKind::ProfileFailed {
                username: seed.to_string(),
                error: details,
            });
            stats.seeds_failed += 1;
            return Ok(SeedFlow::Done);
        };

        // 2. Seed account upsert, before any edge can reference it. Keyed by
        // the resolved id so edges and profile fields land on the same row.
        self.store
            .upsert_account(&account_from_profile(&profile, &seed_account_id))
            .await?;
        stats.accounts_upserted += 1;
        self.log(EventKind::ProfileOpened {
            username: seed.to_string(),
            account_id: Some(seed_account_id.clone()),
            claimed_followers: profile.claimed_followers,
            claimed_following: profile.claimed_following,
        });

        // 3. Policy decision per configured list.
        let now = Utc::now();
        let mut decisions: Vec<ListDecision> = Vec::new();
        let mut last_coverage: Vec<(ListType, Option<f64>)> = Vec::new();
        for list_type in &self.policy.list_types {
            let last = self
                .store
                .get_last_scrape_metrics(&seed_account_id, *list_type)
                .await?
                // An errored attempt is not a usable baseline.
                .filter(|m| m.error_type.is_none());
            last_coverage.push((*list_type, last.as_ref().and_then(|m| m.coverage_ratio)));

            let decision = policy::evaluate(
                *list_type,
                claimed_for(&profile, *list_type),
                last.as_ref(),
                &self.policy,
                now,
            );
            self.log(EventKind::PolicyDecision {
                seed: seed.to_string(),
                list_type: *list_type,
                action: match decision.action {
                    Action::Refresh => "refresh".to_string(),
                    Action::Skip => "skip".to_string(),
                },
                reason: decision.reason.to_string(),
            });
            decisions.push(decision);
        }

        // 4. Confirmation gate.
        if self.policy.require_confirmation && !(self.auto_confirm_first && index == 0) {
            let confirmed = match &self.confirm {
                Some(confirm) => {
                    let probe = self
                        .collector
                        .probe_list(seed, ListType::Following, PROBE_LIMIT)
                        .await
                        .unwrap_or_default();
                    let preview = ConfirmPreview {
                        profile: profile.clone(),
                        decisions: decisions.clone(),
                        last_coverage,
                        probe,
                    };
                    confirm(&preview)
                }
                None => {
                    warn!(seed, "Confirmation required but no callback wired, declining");
                    false
                }
            };
            if !confirmed {
                policy::decline_all(&mut decisions);
                self.log(EventKind::ConfirmationDeclined {
                    seed: seed.to_string(),
                });
                info!(seed, "Confirmation declined, skipping all lists");
            }
        }

        // 5/6. Collect refreshed lists; record a row either way.
        let mut seed_failed = false;
        let mut abort: Option<String> = None;
        for decision in &decisions {
            let claimed = claimed_for(&profile, decision.list_type);
            match decision.action {
                Action::Skip => {
                    rows.push(skip_row(&seed_account_id, decision.list_type, claimed));
                    stats.lists_skipped += 1;
                }
                Action::Refresh => {
                    let started = Utc::now();
                    match self.collector.collect_list(seed, decision.list_type).await {
                        Ok((members, cstats)) => {
                            stats.members_captured += cstats.captured_count;
                            self.persist_members(
                                &seed_account_id,
                                seed,
                                decision.list_type,
                                &members,
                                stats,
                                backfill,
                            )
                            .await?;
                            rows.push(collected_row(
                                &seed_account_id,
                                decision.list_type,
                                started,
                                claimed,
                                &cstats,
                            ));
                            stats.lists_collected += 1;
                            self.log(EventKind::ListCollected {
                                seed: seed.to_string(),
                                list_type: decision.list_type,
                                captured: cstats.captured_count,
                                claimed,
                                scroll_rounds: cstats.scroll_rounds,
                                stagnant_rounds: cstats.stagnant_rounds,
                            });
                        }
                        Err(e) => {
                            let details = e.to_string();
                            rows.push(error_row(&seed_account_id, decision.list_type, &details));
                            stats.lists_failed += 1;
                            self.log(EventKind::ListFailed {
                                seed: seed.to_string(),
                                list_type: decision.list_type,
                                error: details.clone(),
                            });
                            if e.aborts_run() || matches!(e, CollectError::Cancelled) {
                                abort = Some(details);
                                break;
                            }
                            warn!(seed, list = %decision.list_type, error = %details, "List collection failed");
                            seed_failed = true;
                        }
                    }
                }
            }
        }

        if let Some(reason) = abort {
            stats.seeds_failed += 1;
            return Ok(SeedFlow::Abort { reason });
        }
        if seed_failed {
            stats.seeds_failed += 1;
        } else {
            stats.seeds_succeeded += 1;
        }
        Ok(SeedFlow::Done)
    }

    /// Stub accounts first, then edges, in discovery order.
    async fn persist_members(
        &mut self,
        seed_account_id: &str,
        seed_username: &str,
        list_type: ListType,
        members: &[MemberRecord],
        stats: &mut EnrichStats,
        backfill: &mut Vec<String>,
    ) -> Result<()> {
        for member in members {
            let mut stub = NewAccount::stub(&member.account_id, &member.username);
            stub.display_name = member.display_name.clone();
            stub.bio = member.bio.clone();
            self.store.upsert_account(&stub).await?;
            stats.accounts_upserted += 1;

            self.store
                .upsert_edge(&edge_for(seed_account_id, seed_username, member, list_type))
                .await?;
            stats.edges_upserted += 1;

            if self.api.is_some() && member.bio.is_none() {
                backfill.push(member.account_id.clone());
            }
        }
        Ok(())
    }

    /// Backfill profiles in batches. Failures degrade to "profile stays
    /// partial"; nothing here aborts the run.
    async fn drain_backfill(&mut self, stats: &mut EnrichStats, queue: Vec<String>) -> Result<()> {
        let Some(api) = self.api.clone() else {
            return Ok(());
        };
        if queue.is_empty() {
            return Ok(());
        }

        let mut seen = HashSet::new();
        let ids: Vec<String> = queue
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        info!(count = ids.len(), "Draining API backfill queue");

        for chunk in ids.chunks(MAX_BATCH) {
            match api.fetch_profiles_batch(chunk).await {
                Ok(profiles) => {
                    let returned = profiles.len();
                    for profile in profiles.values() {
                        match self.store.upsert_account(&account_from_api(profile)).await {
                            Ok(_) => stats.api_backfilled += 1,
                            Err(e) => {
                                warn!(account_id = %profile.id, error = %e, "Backfill upsert failed")
                            }
                        }
                    }
                    self.log(EventKind::BackfillBatch {
                        requested: chunk.len(),
                        returned,
                    });
                }
                Err(e) => warn!(error = %e, "Backfill batch failed"),
            }
        }
        Ok(())
    }

    /// Metrics rows need a seed id even when the profile never opened: use
    /// the stored mapping when the handle is known, otherwise the normalized
    /// handle itself.
    async fn fallback_seed_id(&self, seed: &str) -> String {
        match self.store.resolve_username(seed).await {
            Ok(Some(id)) => id,
            _ => shadowgraph_common::normalize_username(seed),
        }
    }

    fn log(&mut self, kind: EventKind) {
        if let Some(run_log) = self.run_log.as_mut() {
            run_log.record(kind);
        }
    }
}

fn claimed_for(profile: &CollectedProfile, list_type: ListType) -> Option<i64> {
    match list_type {
        ListType::Following => profile.claimed_following,
        ListType::Followers => profile.claimed_followers,
        // The platform does not advertise a reciprocal count.
        ListType::FollowersYouFollow => None,
    }
}

fn account_from_profile(profile: &CollectedProfile, account_id: &str) -> NewAccount {
    NewAccount {
        account_id: account_id.to_string(),
        username: profile.username.clone(),
        display_name: profile.display_name.clone(),
        bio: profile.bio.clone(),
        location: profile.location.clone(),
        website: profile.website.clone(),
        profile_image_url: profile.profile_image_url.clone(),
        num_followers: profile.claimed_followers,
        num_following: profile.claimed_following,
        num_tweets: profile.claimed_tweets,
        num_likes: None,
        provenance: Some(Provenance::Scrape),
    }
}

fn account_from_api(profile: &ApiProfile) -> NewAccount {
    let metrics = profile.public_metrics.as_ref();
    NewAccount {
        account_id: profile.id.clone(),
        username: profile.username.clone(),
        display_name: profile.name.clone(),
        bio: profile.description.clone(),
        location: profile.location.clone(),
        website: profile.url.clone(),
        profile_image_url: profile.profile_image_url.clone(),
        num_followers: metrics.and_then(|m| m.followers_count),
        num_following: metrics.and_then(|m| m.following_count),
        num_tweets: metrics.and_then(|m| m.tweet_count),
        num_likes: metrics.and_then(|m| m.like_count),
        provenance: Some(Provenance::Api),
    }
}

fn edge_for(
    seed_account_id: &str,
    seed_username: &str,
    member: &MemberRecord,
    list_type: ListType,
) -> NewEdge {
    let direction = list_type.direction();
    let (source_id, target_id) = match direction {
        EdgeDirection::Outbound => (seed_account_id.to_string(), member.account_id.clone()),
        EdgeDirection::Inbound => (member.account_id.clone(), seed_account_id.to_string()),
    };
    NewEdge {
        source_id,
        target_id,
        direction,
        list_type,
        seed_username: seed_username.to_string(),
        metadata: None,
    }
}

fn skip_row(seed_id: &str, list_type: ListType, claimed: Option<i64>) -> ScrapeRunMetrics {
    let now = Utc::now();
    ScrapeRunMetrics {
        seed_id: seed_id.to_string(),
        list_type,
        started_at: now,
        completed_at: now,
        captured_count: 0,
        claimed_count: claimed,
        coverage_ratio: None,
        scroll_rounds: 0,
        stagnant_rounds: 0,
        error_type: None,
        error_details: None,
        skipped: true,
    }
}

fn collected_row(
    seed_id: &str,
    list_type: ListType,
    started_at: chrono::DateTime<Utc>,
    claimed: Option<i64>,
    cstats: &CollectionStats,
) -> ScrapeRunMetrics {
    let captured = cstats.captured_count as i64;
    let coverage_ratio = claimed
        .filter(|c| *c > 0)
        .map(|c| (captured as f64 / c as f64).clamp(0.0, 1.0));
    ScrapeRunMetrics {
        seed_id: seed_id.to_string(),
        list_type,
        started_at,
        completed_at: Utc::now(),
        captured_count: captured,
        claimed_count: claimed,
        coverage_ratio,
        scroll_rounds: cstats.scroll_rounds as i64,
        stagnant_rounds: cstats.stagnant_rounds as i64,
        error_type: None,
        error_details: None,
        skipped: false,
    }
}

fn error_row(seed_id: &str, list_type: ListType, details: &str) -> ScrapeRunMetrics {
    error_row_typed(seed_id, list_type, classify_error(details), details)
}

fn error_row_typed(
    seed_id: &str,
    list_type: ListType,
    error_type: ErrorType,
    details: &str,
) -> ScrapeRunMetrics {
    let now = Utc::now();
    ScrapeRunMetrics {
        seed_id: seed_id.to_string(),
        list_type,
        started_at: now,
        completed_at: now,
        captured_count: 0,
        claimed_count: None,
        coverage_ratio: None,
        scroll_rounds: 0,
        stagnant_rounds: 0,
        error_type: Some(error_type),
        error_details: Some(details.to_string()),
        skipped: false,
    }
}
