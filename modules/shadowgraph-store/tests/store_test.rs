use chrono::Utc;

use shadowgraph_common::{EdgeDirection, ErrorType, ListType, Provenance, ScrapeRunMetrics};
use shadowgraph_store::{NewAccount, NewEdge, ShadowStore};

fn account(id: &str, username: &str) -> NewAccount {
    NewAccount {
        account_id: id.to_string(),
        username: username.to_string(),
        provenance: Some(Provenance::Scrape),
        ..Default::default()
    }
}

fn edge(source: &str, target: &str, list_type: ListType, seed: &str) -> NewEdge {
    NewEdge {
        source_id: source.to_string(),
        target_id: target.to_string(),
        direction: list_type.direction(),
        list_type,
        seed_username: seed.to_string(),
        metadata: None,
    }
}

fn metrics(seed: &str, list_type: ListType, captured: i64, skipped: bool) -> ScrapeRunMetrics {
    let now = Utc::now();
    ScrapeRunMetrics {
        seed_id: seed.to_string(),
        list_type,
        started_at: now,
        completed_at: now,
        captured_count: captured,
        claimed_count: None,
        coverage_ratio: None,
        scroll_rounds: 0,
        stagnant_rounds: 0,
        error_type: None,
        error_details: None,
        skipped,
    }
}

#[tokio::test]
async fn merge_upsert_coalesces_null_fields() {
    let store = ShadowStore::connect_in_memory().await.unwrap();

    let mut first = account("1", "alice");
    first.bio = Some("hello".to_string());
    store.upsert_account(&first).await.unwrap();

    let mut second = account("1", "alice");
    second.location = Some("NYC".to_string());
    let merged = store.upsert_account(&second).await.unwrap();

    assert_eq!(merged.bio.as_deref(), Some("hello"), "null must not clobber");
    assert_eq!(merged.location.as_deref(), Some("NYC"));
}

#[tokio::test]
async fn merge_never_decreases_populated_fields() {
    let store = ShadowStore::connect_in_memory().await.unwrap();

    let mut full = account("1", "alice");
    full.display_name = Some("Alice".to_string());
    full.bio = Some("bio".to_string());
    full.num_followers = Some(10);
    let before = store.upsert_account(&full).await.unwrap();

    let sparse = account("1", "alice");
    let after = store.upsert_account(&sparse).await.unwrap();

    let count_non_null = |a: &shadowgraph_common::ShadowAccount| {
        [
            a.display_name.is_some(),
            a.bio.is_some(),
            a.location.is_some(),
            a.website.is_some(),
            a.num_followers.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count()
    };
    assert!(
        count_non_null(&after) >= count_non_null(&before),
        "merge must be monotone in populated fields"
    );
}

#[tokio::test]
async fn upsert_account_is_idempotent() {
    let store = ShadowStore::connect_in_memory().await.unwrap();

    let mut a = account("1", "alice");
    a.bio = Some("bio".to_string());
    a.num_followers = Some(5);

    let once = store.upsert_account(&a).await.unwrap();
    let twice = store.upsert_account(&a).await.unwrap();

    assert_eq!(once.account_id, twice.account_id);
    assert_eq!(once.bio, twice.bio);
    assert_eq!(once.num_followers, twice.num_followers);
    assert_eq!(once.first_seen_at, twice.first_seen_at, "first_seen_at is insert-only");
    assert!(twice.last_updated_at >= once.last_updated_at);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.accounts, 1);
}

#[tokio::test]
async fn cross_provenance_merge_marks_merged() {
    let store = ShadowStore::connect_in_memory().await.unwrap();

    store.upsert_account(&account("1", "alice")).await.unwrap();

    let mut from_api = account("1", "alice");
    from_api.provenance = Some(Provenance::Api);
    let merged = store.upsert_account(&from_api).await.unwrap();

    assert_eq!(merged.provenance, Provenance::Merged);
}

#[tokio::test]
async fn upsert_edge_is_idempotent() {
    let store = ShadowStore::connect_in_memory().await.unwrap();
    store.upsert_account(&account("1", "alice")).await.unwrap();
    store.upsert_account(&account("2", "bob")).await.unwrap();

    let e = edge("1", "2", ListType::Following, "alice");
    store.upsert_edge(&e).await.unwrap();
    store.upsert_edge(&e).await.unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.edges, 1, "re-observation must not duplicate the edge");
}

#[tokio::test]
async fn edge_requires_existing_endpoints() {
    let store = ShadowStore::connect_in_memory().await.unwrap();
    store.upsert_account(&account("1", "alice")).await.unwrap();

    let orphan = edge("1", "999", ListType::Following, "alice");
    let err = store.upsert_edge(&orphan).await;
    assert!(err.is_err(), "edge to a missing account must be rejected");
}

#[tokio::test]
async fn reobservation_touches_captured_at() {
    let store = ShadowStore::connect_in_memory().await.unwrap();
    store.upsert_account(&account("1", "alice")).await.unwrap();
    store.upsert_account(&account("2", "bob")).await.unwrap();

    let e = edge("1", "2", ListType::Following, "alice");
    store.upsert_edge(&e).await.unwrap();
    let first = store
        .get_edges_for_seed("1", EdgeDirection::Outbound)
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    store.upsert_edge(&e).await.unwrap();
    let second = store
        .get_edges_for_seed("1", EdgeDirection::Outbound)
        .await
        .unwrap();

    assert_eq!(second.len(), 1);
    assert!(second[0].captured_at >= first[0].captured_at);
}

#[tokio::test]
async fn last_scrape_metrics_skips_skipped_rows() {
    let store = ShadowStore::connect_in_memory().await.unwrap();

    let mut old = metrics("1", ListType::Following, 40, false);
    old.completed_at = Utc::now() - chrono::Duration::days(3);
    old.started_at = old.completed_at;
    store.record_run_metrics(&old).await.unwrap();

    store
        .record_run_metrics(&metrics("1", ListType::Following, 0, true))
        .await
        .unwrap();

    let last = store
        .get_last_scrape_metrics("1", ListType::Following)
        .await
        .unwrap()
        .expect("non-skipped row exists");
    assert_eq!(last.captured_count, 40, "skipped rows must not win");

    let none = store
        .get_last_scrape_metrics("1", ListType::Followers)
        .await
        .unwrap();
    assert!(none.is_none());
}

#[tokio::test]
async fn skipped_row_with_captures_is_rejected() {
    let store = ShadowStore::connect_in_memory().await.unwrap();
    let bad = metrics("1", ListType::Following, 7, true);
    assert!(store.record_run_metrics(&bad).await.is_err());
}

#[tokio::test]
async fn error_row_round_trips_classification() {
    let store = ShadowStore::connect_in_memory().await.unwrap();

    let mut m = metrics("1", ListType::Followers, 0, false);
    m.error_type = Some(ErrorType::Blocked);
    m.error_details = Some("anti-automation gate".to_string());
    store.record_run_metrics(&m).await.unwrap();

    let last = store
        .get_last_scrape_metrics("1", ListType::Followers)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(last.error_type, Some(ErrorType::Blocked));
}

#[tokio::test]
async fn coverage_ratio_out_of_bounds_is_rejected() {
    let store = ShadowStore::connect_in_memory().await.unwrap();
    let mut m = metrics("1", ListType::Following, 10, false);
    m.coverage_ratio = Some(1.5);
    assert!(store.record_run_metrics(&m).await.is_err());
}

#[tokio::test]
async fn edge_summary_counts_by_list_type() {
    let store = ShadowStore::connect_in_memory().await.unwrap();
    for (id, name) in [("1", "seed"), ("2", "a"), ("3", "b"), ("4", "c")] {
        store.upsert_account(&account(id, name)).await.unwrap();
    }

    // seed follows a and b; c follows seed; b is a reciprocal follower.
    store
        .upsert_edge(&edge("1", "2", ListType::Following, "seed"))
        .await
        .unwrap();
    store
        .upsert_edge(&edge("1", "3", ListType::Following, "seed"))
        .await
        .unwrap();
    store
        .upsert_edge(&edge("4", "1", ListType::Followers, "seed"))
        .await
        .unwrap();
    store
        .upsert_edge(&edge("3", "1", ListType::FollowersYouFollow, "seed"))
        .await
        .unwrap();

    let summary = store.edge_summary("1").await.unwrap();
    assert_eq!(summary.following_count, 2);
    assert_eq!(summary.followers_count, 1);
    assert_eq!(summary.reciprocal_count, 1);
}

#[tokio::test]
async fn resolve_username_is_case_insensitive_and_prefers_recent() {
    let store = ShadowStore::connect_in_memory().await.unwrap();

    store.upsert_account(&account("1", "Alice")).await.unwrap();
    assert_eq!(
        store.resolve_username("alice").await.unwrap().as_deref(),
        Some("1")
    );
    assert_eq!(
        store.resolve_username("@ALICE").await.unwrap().as_deref(),
        Some("1")
    );

    // The handle moves to a new account; the newer row wins.
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    store.upsert_account(&account("2", "alice")).await.unwrap();
    assert_eq!(
        store.resolve_username("Alice").await.unwrap().as_deref(),
        Some("2")
    );

    assert!(store.resolve_username("nobody").await.unwrap().is_none());
}

#[tokio::test]
async fn edges_for_seed_ordered_newest_first() {
    let store = ShadowStore::connect_in_memory().await.unwrap();
    for (id, name) in [("1", "seed"), ("2", "a"), ("3", "b")] {
        store.upsert_account(&account(id, name)).await.unwrap();
    }

    store
        .upsert_edge(&edge("1", "2", ListType::Following, "seed"))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    store
        .upsert_edge(&edge("1", "3", ListType::Following, "seed"))
        .await
        .unwrap();

    let edges = store
        .get_edges_for_seed("1", EdgeDirection::Outbound)
        .await
        .unwrap();
    assert_eq!(edges.len(), 2);
    assert!(edges[0].captured_at >= edges[1].captured_at);
    assert_eq!(edges[0].target_id, "3");
}
