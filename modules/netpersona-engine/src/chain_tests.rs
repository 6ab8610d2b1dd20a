//! Chain tests: the real Orchestrator and Ledger over mocked stages.
//!
//! MockFilter → CountingAssembler(real ContextAssembler) → MockGenerator,
//! with a MemoryLedgerStore and MemoryAuditSink underneath. The last group
//! swaps in the real Judge and Ghostwriter driven by a ScriptedModel.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use netpersona_common::{
    CandidateContent, CandidateKey, EngagementStrength, Outcome, Platform, SkipReason, Stage, StyleBook,
};

use crate::audit::AuditEvent;
use crate::context::ContextAssembler;
use crate::error::{LedgerError, PipelineError};
use crate::ghostwriter::Ghostwriter;
use crate::judge::{Judge, TopicPolicy};
use crate::ledger::{BudgetCaps, Ledger, MemoryLedgerStore};
use crate::orchestrator::{Orchestrator, PipelineDeps};
use crate::persona::Persona;
use crate::testing::{
    post, rejected_verdict, test_day, CountingAssembler, MemoryAuditSink, MockFilter,
    MockGenerator, ScriptedModel, TestPipeline,
};

// ---------------------------------------------------------------------------
// Act path and dedup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn approved_post_with_confident_reply_acts_and_counts() {
    let pipeline = TestPipeline::builder().generator(MockGenerator::responding(82)).build();
    let candidate = post("p1", "Kubernetes tutorial: HPA from scratch", 0);

    let decision = pipeline.orchestrator.process(&candidate).await.unwrap();

    assert_eq!(decision.outcome, Outcome::Act);
    assert_eq!(decision.stage, Stage::Gate);
    assert_eq!(decision.confidence, Some(82));
    assert!(decision.response_text.is_some());
    assert_eq!(pipeline.count_today(Platform::X), 1);
    assert_eq!(pipeline.store.decision(&candidate.key), Some(decision));
}

#[tokio::test]
async fn low_strength_context_reaches_the_generator() {
    let pipeline = TestPipeline::builder().build();
    pipeline
        .orchestrator
        .process(&post("p1", "Kubernetes tutorial", 0))
        .await
        .unwrap();

    let built = pipeline
        .audit
        .records()
        .into_iter()
        .find_map(|r| match r.event {
            AuditEvent::ContextBuilt { strength, strategy, .. } => Some((strength, strategy)),
            _ => None,
        })
        .unwrap();
    assert_eq!(built.0, EngagementStrength::Low);
    assert_eq!(built.1, "initiate discussion, be provocative but civil");
}

#[tokio::test]
async fn resubmission_returns_prior_decision_without_paid_stages() {
    let pipeline = TestPipeline::builder().generator(MockGenerator::responding(82)).build();
    let candidate = post("p1", "Kubernetes tutorial", 0);

    let first = pipeline.orchestrator.process(&candidate).await.unwrap();
    let second = pipeline.orchestrator.process(&candidate).await.unwrap();

    assert_eq!(second, first);
    assert_eq!(pipeline.count_today(Platform::X), 1);
    assert_eq!(pipeline.filter.call_count(), 1);
    assert_eq!(pipeline.generator.call_count(), 1);
}

#[tokio::test]
async fn resubmitted_skip_is_replayed_too() {
    let pipeline = TestPipeline::builder()
        .filter(MockFilter::rejecting("crypto trading signals"))
        .build();
    let candidate = post("c1", "crypto trading signals", 0);

    let first = pipeline.orchestrator.process(&candidate).await.unwrap();
    let second = pipeline.orchestrator.process(&candidate).await.unwrap();

    assert_eq!(first.reason, Some(SkipReason::Irrelevant));
    assert_eq!(second, first);
    assert_eq!(pipeline.filter.call_count(), 1);
}

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exhausted_budget_skips_before_the_filter() {
    let pipeline = TestPipeline::builder()
        .cap(5)
        .store(MemoryLedgerStore::new().with_count(Platform::X, test_day(), 5))
        .build();

    let decision = pipeline
        .orchestrator
        .process(&post("p6", "Kubernetes tutorial", 0))
        .await
        .unwrap();

    assert_eq!(decision.outcome, Outcome::Skip);
    assert_eq!(decision.reason, Some(SkipReason::BudgetExhausted));
    assert_eq!(decision.stage, Stage::Ledger);
    assert_eq!(pipeline.filter.call_count(), 0);
    assert_eq!(pipeline.count_today(Platform::X), 5);
}

#[tokio::test]
async fn budget_exhausted_skip_is_not_recorded_as_processed() {
    let pipeline = TestPipeline::builder()
        .store(MemoryLedgerStore::new().with_count(Platform::X, test_day(), 5))
        .build();
    let candidate = post("p6", "Kubernetes tutorial", 0);

    pipeline.orchestrator.process(&candidate).await.unwrap();
    assert!(pipeline.store.decision(&candidate.key).is_none());
}

#[tokio::test]
async fn cap_is_reached_after_exactly_cap_acts() {
    let pipeline = TestPipeline::builder().cap(2).build();

    let mut outcomes = Vec::new();
    for id in ["a", "b", "c"] {
        let decision = pipeline
            .orchestrator
            .process(&post(id, "Rust async runtimes", 3))
            .await
            .unwrap();
        outcomes.push(decision.reason);
    }

    assert_eq!(outcomes, vec![None, None, Some(SkipReason::BudgetExhausted)]);
    assert_eq!(pipeline.count_today(Platform::X), 2);
}

// ---------------------------------------------------------------------------
// Confidence gate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn low_confidence_skips_after_context_was_built() {
    let pipeline = TestPipeline::builder()
        .threshold(70)
        .generator(MockGenerator::responding(55))
        .build();
    let candidate = post("p2", "Kubernetes tutorial", 4);

    let decision = pipeline.orchestrator.process(&candidate).await.unwrap();

    assert_eq!(decision.outcome, Outcome::Skip);
    assert_eq!(decision.reason, Some(SkipReason::LowConfidence));
    assert_eq!(decision.stage, Stage::Gate);
    assert_eq!(decision.confidence, Some(55));
    assert!(decision.response_text.is_none());
    assert_eq!(pipeline.assembler.call_count(), 1);
    assert_eq!(pipeline.count_today(Platform::X), 0);
}

#[tokio::test]
async fn confidence_equal_to_threshold_acts() {
    let pipeline = TestPipeline::builder()
        .threshold(70)
        .generator(MockGenerator::responding(70))
        .build();

    let decision = pipeline
        .orchestrator
        .process(&post("p3", "Kubernetes tutorial", 4))
        .await
        .unwrap();

    assert!(decision.is_act());
    assert_eq!(pipeline.count_today(Platform::X), 1);
}

// ---------------------------------------------------------------------------
// Stage failures resolve to skips
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rejected_post_never_reaches_assembly_or_generation() {
    let pipeline = TestPipeline::builder()
        .filter(MockFilter::approving().on_candidate("c1", rejected_verdict("crypto trading signals")))
        .build();

    let decision = pipeline
        .orchestrator
        .process(&post("c1", "crypto trading signals", 0))
        .await
        .unwrap();

    assert_eq!(decision.reason, Some(SkipReason::Irrelevant));
    assert_eq!(decision.stage, Stage::Filter);
    assert_eq!(pipeline.assembler.call_count(), 0);
    assert_eq!(pipeline.generator.call_count(), 0);
}

#[tokio::test]
async fn filter_failure_is_distinct_from_rejection() {
    let pipeline = TestPipeline::builder()
        .filter(MockFilter::failing("model overloaded"))
        .build();
    let candidate = post("p4", "Kubernetes tutorial", 0);

    let decision = pipeline.orchestrator.process(&candidate).await.unwrap();

    assert_eq!(decision.reason, Some(SkipReason::FilterError));
    assert!(decision.rationale.contains("model overloaded"));
    assert_eq!(pipeline.generator.call_count(), 0);
    assert_eq!(
        pipeline.audit.events_for(&candidate.key),
        vec!["ledger_checked", "filter_failed", "terminal"]
    );
    // Recorded: a later run does not pay for the filter again.
    assert!(pipeline.store.decision(&candidate.key).is_some());
}

#[tokio::test]
async fn malformed_filter_output_fails_closed() {
    let pipeline = TestPipeline::builder()
        .filter(MockFilter::malformed("language \"English\" is not a language code"))
        .build();

    let decision = pipeline
        .orchestrator
        .process(&post("p4", "Kubernetes tutorial", 0))
        .await
        .unwrap();

    assert_eq!(decision.outcome, Outcome::Skip);
    assert_eq!(decision.reason, Some(SkipReason::FilterError));
}

#[tokio::test]
async fn filter_timeout_is_a_filter_error() {
    let pipeline = TestPipeline::builder()
        .filter(MockFilter::hanging())
        .filter_timeout(Duration::from_millis(20))
        .build();

    let decision = pipeline
        .orchestrator
        .process(&post("p5", "Kubernetes tutorial", 0))
        .await
        .unwrap();

    assert_eq!(decision.reason, Some(SkipReason::FilterError));
    assert!(decision.rationale.contains("timed out"));
}

#[tokio::test]
async fn missing_style_rule_skips_without_commit() {
    let pipeline = TestPipeline::builder()
        .styles(StyleBook::defaults().without(Platform::Bluesky))
        .build();
    let candidate = CandidateContent::new(
        Platform::Bluesky,
        "b1",
        "dev",
        "Kubernetes tutorial",
    );

    let decision = pipeline.orchestrator.process(&candidate).await.unwrap();

    assert_eq!(decision.reason, Some(SkipReason::AssemblyFailed));
    assert_eq!(decision.stage, Stage::Context);
    assert!(decision.rationale.contains("No style rule"));
    assert_eq!(pipeline.generator.call_count(), 0);
    assert_eq!(pipeline.count_today(Platform::Bluesky), 0);
}

#[tokio::test]
async fn constraint_failure_after_retry_is_generation_failed() {
    let pipeline = TestPipeline::builder()
        .generator(MockGenerator::violating())
        .build();

    let decision = pipeline
        .orchestrator
        .process(&post("p7", "Kubernetes tutorial", 2))
        .await
        .unwrap();

    assert_eq!(decision.reason, Some(SkipReason::GenerationFailed));
    assert_eq!(decision.stage, Stage::Generator);
    assert_eq!(pipeline.count_today(Platform::X), 0);
}

#[tokio::test]
async fn slow_generator_is_generation_timeout() {
    let pipeline = TestPipeline::builder()
        .generator(MockGenerator::hanging())
        .generator_timeout(Duration::from_millis(20))
        .build();

    let decision = pipeline
        .orchestrator
        .process(&post("p8", "Kubernetes tutorial", 2))
        .await
        .unwrap();

    assert_eq!(decision.reason, Some(SkipReason::GenerationTimeout));
    assert_eq!(pipeline.count_today(Platform::X), 0);
}

// ---------------------------------------------------------------------------
// Halting errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ledger_outage_halts_before_any_paid_stage() {
    let pipeline = TestPipeline::builder().build();
    pipeline.store.set_unavailable(true);

    let err = pipeline
        .orchestrator
        .process(&post("p9", "Kubernetes tutorial", 0))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Ledger(LedgerError::Storage(_))));
    assert_eq!(pipeline.filter.call_count(), 0);
}

#[tokio::test]
async fn audit_outage_halts_and_leaves_ledger_untouched() {
    let pipeline = TestPipeline::builder().build();
    pipeline.audit.set_failing(true);
    let candidate = post("p10", "Kubernetes tutorial", 0);

    let err = pipeline.orchestrator.process(&candidate).await.unwrap_err();

    assert!(matches!(err, PipelineError::AuditUnavailable(_)));
    assert_eq!(pipeline.filter.call_count(), 0);
    assert!(pipeline.store.decision(&candidate.key).is_none());

    // The reservation was released with the failed run.
    pipeline.audit.set_failing(false);
    let decision = pipeline.orchestrator.process(&candidate).await.unwrap();
    assert!(decision.is_act());
}

// ---------------------------------------------------------------------------
// Audit trail
// ---------------------------------------------------------------------------

#[tokio::test]
async fn audit_has_one_record_per_stage_reached() {
    let pipeline = TestPipeline::builder().build();
    let candidate = post("p11", "Kubernetes tutorial", 0);

    pipeline.orchestrator.process(&candidate).await.unwrap();

    assert_eq!(
        pipeline.audit.events_for(&candidate.key),
        vec!["ledger_checked", "verdict", "context_built", "generated", "terminal"]
    );
    assert_eq!(
        pipeline.audit.stages_for(&candidate.key),
        vec![Stage::Ledger, Stage::Filter, Stage::Context, Stage::Generator, Stage::Gate]
    );

    let records = pipeline.audit.records();
    assert!(records.iter().all(|r| r.run_id == records[0].run_id));
}

#[tokio::test]
async fn context_gaps_are_audited() {
    let pipeline = TestPipeline::builder().build();
    pipeline
        .orchestrator
        .process(&post("p12", "Kubernetes tutorial", 0))
        .await
        .unwrap();

    let gaps = pipeline
        .audit
        .records()
        .into_iter()
        .find_map(|r| match r.event {
            AuditEvent::ContextBuilt { gaps, .. } => Some(gaps),
            _ => None,
        })
        .unwrap();
    // No similarity index, no profiler, no replies.
    assert_eq!(gaps.len(), 3);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_runs_on_one_candidate_call_the_filter_once() {
    let pipeline = TestPipeline::builder()
        .filter(MockFilter::approving().with_delay(Duration::from_millis(50)))
        .build();
    let candidate = post("p13", "Kubernetes tutorial", 0);

    let (a, b) = tokio::join!(
        pipeline.orchestrator.process(&candidate),
        pipeline.orchestrator.process(&candidate),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(pipeline.filter.call_count(), 1);
    let duplicates = [&a, &b]
        .iter()
        .filter(|d| d.reason == Some(SkipReason::Duplicate))
        .count();
    assert_eq!(duplicates, 1);
    assert_eq!(pipeline.count_today(Platform::X), 1);
}

#[tokio::test]
async fn cancelled_run_leaves_no_ledger_mutation() {
    let pipeline = TestPipeline::builder()
        .generator(MockGenerator::hanging())
        .build();
    let candidate = post("p14", "Kubernetes tutorial", 0);

    let cancelled =
        tokio::time::timeout(Duration::from_millis(30), pipeline.orchestrator.process(&candidate)).await;
    assert!(cancelled.is_err());

    assert!(pipeline.store.decision(&candidate.key).is_none());
    assert_eq!(pipeline.count_today(Platform::X), 0);
    let state = pipeline.ledger().budget_state(Platform::X).await.unwrap();
    assert_eq!(state.count, 0);
}

// ---------------------------------------------------------------------------
// Real Judge and Ghostwriter over a scripted model
// ---------------------------------------------------------------------------

struct ModelPipeline {
    orchestrator: Orchestrator,
    judge_model: Arc<ScriptedModel>,
    writer_model: Arc<ScriptedModel>,
    assembler: Arc<CountingAssembler>,
    store: Arc<MemoryLedgerStore>,
}

fn model_pipeline(judge_model: ScriptedModel, writer_model: ScriptedModel) -> ModelPipeline {
    let judge_model = Arc::new(judge_model);
    let writer_model = Arc::new(writer_model);
    let store = Arc::new(MemoryLedgerStore::new());
    let assembler = Arc::new(CountingAssembler::new(Arc::new(ContextAssembler::new(
        Arc::new(StyleBook::defaults()),
    ))));
    let day = test_day();

    let orchestrator = Orchestrator::new(
        PipelineDeps::builder()
            .ledger(Ledger::with_clock(store.clone(), BudgetCaps::new(15), Arc::new(move || day)))
            .filter(Arc::new(Judge::new(judge_model.clone(), TopicPolicy::default())))
            .assembler(assembler.clone())
            .generator(Arc::new(Ghostwriter::new(writer_model.clone(), Persona::default())))
            .audit(Arc::new(MemoryAuditSink::new()))
            .build(),
    );

    ModelPipeline {
        orchestrator,
        judge_model,
        writer_model,
        assembler,
        store,
    }
}

#[tokio::test]
async fn kubernetes_tutorial_acts_end_to_end() {
    let pipeline = model_pipeline(
        ScriptedModel::new().then_ok(json!({
            "should_engage": true,
            "category": "Technical",
            "language": "en",
            "rationale": "Kubernetes tutorial"
        })),
        ScriptedModel::new().then_ok(json!({
            "reply_text": "Set resource requests before touching the HPA. Without them it scales on noise.",
            "language": "en",
            "confidence_score": 82,
            "rationale": "Concrete and peer-level"
        })),
    );
    let candidate = post("p1", "Kubernetes tutorial: autoscaling 101", 0);

    let decision = pipeline.orchestrator.process(&candidate).await.unwrap();

    assert!(decision.is_act());
    assert_eq!(decision.confidence, Some(82));
    assert_eq!(pipeline.store.count(Platform::X, test_day()), 1);
    assert!(pipeline.writer_model.prompts()[0].contains("Max 280 characters"));
    assert!(pipeline.writer_model.prompts()[0].contains("initiate discussion"));
}

#[tokio::test]
async fn deny_listed_post_stops_at_the_judge_for_free() {
    let pipeline = model_pipeline(ScriptedModel::new(), ScriptedModel::new());
    let candidate = post("c1", "Daily crypto trading signals, 10x guaranteed", 0);

    let decision = pipeline.orchestrator.process(&candidate).await.unwrap();

    assert_eq!(decision.reason, Some(SkipReason::Irrelevant));
    assert_eq!(pipeline.judge_model.call_count(), 0);
    assert_eq!(pipeline.assembler.call_count(), 0);
    assert_eq!(pipeline.writer_model.call_count(), 0);
}

#[tokio::test]
async fn career_post_in_portuguese_keeps_its_language() {
    let pipeline = model_pipeline(
        ScriptedModel::new().then_ok(json!({
            "should_engage": true,
            "category": "Career",
            "language": "pt-BR",
            "rationale": "Carreira em tech"
        })),
        ScriptedModel::new()
            .then_ok(json!({
                "reply_text": "Senioridade é saber o custo de cada abstração, não quantas você conhece.",
                "language": "en",
                "confidence_score": 80,
                "rationale": "wrong language label"
            }))
            .then_ok(json!({
                "reply_text": "Senioridade é saber o custo de cada abstração, não quantas você conhece.",
                "language": "pt",
                "confidence_score": 80,
                "rationale": "tom direto"
            })),
    );
    let candidate = post("p20", "O que define um dev sênior?", 5);

    let decision = pipeline.orchestrator.process(&candidate).await.unwrap();

    assert!(decision.is_act());
    assert_eq!(pipeline.writer_model.call_count(), 2);
    let first_prompt = &pipeline.writer_model.prompts()[0];
    assert!(first_prompt.contains("Category: Career | Language: pt-br"));
}

#[tokio::test]
async fn unknown_judge_category_skips_as_filter_error() {
    let pipeline = model_pipeline(
        ScriptedModel::new().then_ok(json!({
            "should_engage": true,
            "category": "Gossip",
            "language": "en",
            "rationale": "?"
        })),
        ScriptedModel::new(),
    );

    let decision = pipeline
        .orchestrator
        .process(&post("p21", "Kubernetes tutorial", 0))
        .await
        .unwrap();

    assert_eq!(decision.reason, Some(SkipReason::FilterError));
    assert_eq!(pipeline.writer_model.call_count(), 0);
}

#[tokio::test]
async fn keys_differ_by_platform() {
    let pipeline = TestPipeline::builder().build();
    let on_x = post("same-id", "Kubernetes tutorial", 0);
    let mut on_threads = on_x.clone();
    on_threads.key = CandidateKey::new(Platform::Threads, "same-id");

    assert!(pipeline.orchestrator.process(&on_x).await.unwrap().is_act());
    assert!(pipeline.orchestrator.process(&on_threads).await.unwrap().is_act());
    assert_eq!(pipeline.filter.call_count(), 2);
}
