//! Integration tests for the Postgres ledger and audit log.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use chrono::NaiveDate;
use netpersona_common::{
    CandidateKey, Decision, GeneratedResponse, Platform, SkipReason, Stage,
};
use netpersona_store::{AuditLog, AuditRow, PgLedgerStore, ReplyHistory};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

/// Get a migrated, empty test database pool, or skip if none is available.
async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    netpersona_store::migrate(&pool).await.ok()?;

    sqlx::query("TRUNCATE daily_budget, processed_candidates, pipeline_audit RESTART IDENTITY")
        .execute(&pool)
        .await
        .ok()?;

    Some(pool)
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
}

const CAP: u32 = 15;

fn act(id: &str) -> Decision {
    act_saying(id, "Readiness checks first, then tune the HPA.")
}

fn act_saying(id: &str, text: &str) -> Decision {
    let response = GeneratedResponse {
        text: text.into(),
        confidence: 82,
        rationale: "peer-level tip".into(),
        attempts: 1,
    };
    Decision::act(CandidateKey::new(Platform::X, id), Uuid::new_v4(), &response)
}

#[tokio::test]
async fn unknown_candidate_has_no_prior_decision() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PgLedgerStore::new(pool);

    let prior = store
        .prior_decision(&CandidateKey::new(Platform::X, "nope"))
        .await
        .unwrap();
    assert!(prior.is_none());
    assert_eq!(store.daily_count(Platform::X, day()).await.unwrap(), 0);
}

#[tokio::test]
async fn record_act_increments_and_round_trips_decision() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PgLedgerStore::new(pool);

    let decision = act("p1");
    assert_eq!(store.record_act(&decision, day(), CAP).await.unwrap(), Some(1));
    assert_eq!(store.record_act(&act("p2"), day(), CAP).await.unwrap(), Some(2));

    let prior = store.prior_decision(&decision.key).await.unwrap().unwrap();
    assert_eq!(prior, decision);
    assert_eq!(store.daily_count(Platform::X, day()).await.unwrap(), 2);
    assert_eq!(store.daily_count(Platform::Threads, day()).await.unwrap(), 0);
}

#[tokio::test]
async fn second_act_for_same_candidate_rolls_back() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PgLedgerStore::new(pool);

    let decision = act("p1");
    store.record_act(&decision, day(), CAP).await.unwrap();
    assert!(store.record_act(&decision, day(), CAP).await.is_err());
    assert_eq!(store.daily_count(Platform::X, day()).await.unwrap(), 1);
}

#[tokio::test]
async fn act_at_cap_writes_nothing() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PgLedgerStore::new(pool);

    assert_eq!(store.record_act(&act("p1"), day(), 1).await.unwrap(), Some(1));

    let late = act("p2");
    assert_eq!(store.record_act(&late, day(), 1).await.unwrap(), None);
    assert!(store.prior_decision(&late.key).await.unwrap().is_none());
    assert_eq!(store.daily_count(Platform::X, day()).await.unwrap(), 1);

    assert_eq!(store.record_act(&act("p3"), day(), 0).await.unwrap(), None);
}

#[tokio::test]
async fn concurrent_stores_share_one_cap() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let first = PgLedgerStore::new(pool.clone());
    let second = PgLedgerStore::new(pool);

    let (a, b) = (act("p1"), act("p2"));
    let (left, right) = tokio::join!(
        first.record_act(&a, day(), 1),
        second.record_act(&b, day(), 1),
    );

    let committed = [left.unwrap(), right.unwrap()]
        .into_iter()
        .filter(Option::is_some)
        .count();
    assert_eq!(committed, 1);
    assert_eq!(first.daily_count(Platform::X, day()).await.unwrap(), 1);
}

#[tokio::test]
async fn reply_history_ranks_acted_replies_by_shared_words() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PgLedgerStore::new(pool.clone());
    let history = ReplyHistory::new(pool);

    store
        .record_act(&act_saying("p1", "Pin the HPA min replicas before tuning the HPA target."), day(), CAP)
        .await
        .unwrap();
    store
        .record_act(&act_saying("p2", "Small PRs review faster."), day(), CAP)
        .await
        .unwrap();
    store
        .record_act(&act_saying("p3", "Tune the HPA slowly."), day(), CAP)
        .await
        .unwrap();
    store
        .record_decision(&Decision::skip(
            CandidateKey::new(Platform::X, "c1"),
            Uuid::new_v4(),
            Stage::Filter,
            SkipReason::Irrelevant,
            "HPA replicas tuning",
        ))
        .await
        .unwrap();

    let found = history.similar_replies("tuning HPA replicas", 5).await.unwrap();
    assert_eq!(found.len(), 2);
    assert!(found[0].text.starts_with("Pin the HPA"));
    assert!(found[0].score >= found[1].score);
    assert!(found.iter().all(|f| !f.text.contains("PRs")));

    assert!(history.similar_replies("   ", 5).await.unwrap().is_empty());
    assert_eq!(history.similar_replies("HPA", 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn skip_decisions_do_not_touch_the_counter() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PgLedgerStore::new(pool);

    let skip = Decision::skip(
        CandidateKey::new(Platform::X, "c1"),
        Uuid::new_v4(),
        Stage::Filter,
        SkipReason::Irrelevant,
        "crypto trading",
    );
    store.record_decision(&skip).await.unwrap();
    store.record_decision(&skip).await.unwrap();

    assert_eq!(store.prior_decision(&skip.key).await.unwrap(), Some(skip));
    assert_eq!(store.daily_count(Platform::X, day()).await.unwrap(), 0);
}

#[tokio::test]
async fn audit_rows_read_back_in_order() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let log = AuditLog::new(pool);
    let run_id = Uuid::new_v4();
    let key = CandidateKey::new(Platform::X, "p1");

    for (stage, event) in [(Stage::Ledger, "ledger_checked"), (Stage::Filter, "verdict")] {
        log.append(&AuditRow {
            run_id,
            key: key.clone(),
            stage,
            event_type: event.into(),
            payload: json!({ "event": event }),
            ts: chrono::Utc::now(),
        })
        .await
        .unwrap();
    }

    let rows = log.read_run(run_id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0, "ledger");
    assert_eq!(rows[1].1, "verdict");
}
