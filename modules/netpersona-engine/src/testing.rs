// Test mocks for the decision pipeline.
//
// One mock per trait boundary:
// - ScriptedModel (StructuredModel): queued JSON answers, errors or hangs
// - MockFilter (RelevanceFilter): per-candidate verdicts with a default
// - CountingAssembler (ContextBuilder): wraps a real assembler, counts calls
// - MockGenerator (ContentGenerator): fixed response, failure or hang
// - StaticSimilarity / StaticProfiler: context sources
// - MemoryAuditSink (AuditSink): records everything, can be made to fail
//
// Plus TestPipeline, which wires a real Orchestrator and Ledger over them.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;

use netpersona_common::{
    AudienceDossier, Author, CandidateContent, CandidateKey, Category, EngagementContext,
    EngagementStrength, GeneratedResponse, Platform, PriorExcerpt, RelevanceVerdict, Stage,
    StyleBook, StyleRule, TechnicalLevel,
};

use crate::audit::AuditRecord;
use crate::constraints::Violation;
use crate::context::ContextAssembler;
use crate::error::{AssemblyError, FilterError, GenerationError};
use crate::ledger::{BudgetCaps, Ledger, MemoryLedgerStore};
use crate::orchestrator::{Orchestrator, PipelineConfig, PipelineDeps};
use crate::traits::{
    AudienceProfiler, AuditSink, ContentGenerator, ContextBuilder, ProfileLookup,
    RelevanceFilter, SimilaritySearch, StructuredModel,
};

// ---------------------------------------------------------------------------
// Test constants
// ---------------------------------------------------------------------------

/// The ledger clock's "today" in every TestPipeline.
pub fn test_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 16).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// ScriptedModel
// ---------------------------------------------------------------------------

enum Scripted {
    Value(Value),
    Error(String),
    Hang,
}

/// Structured model that replays a script, one entry per call.
/// Builder pattern: `.then_ok()`, `.then_err()`, `.then_hang()`.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Scripted>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn then_ok(self, value: Value) -> Self {
        self.script.lock().unwrap().push_back(Scripted::Value(value));
        self
    }

    pub fn then_err(self, message: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Error(message.to_string()));
        self
    }

    pub fn then_hang(self) -> Self {
        self.script.lock().unwrap().push_back(Scripted::Hang);
        self
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    /// User prompts received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StructuredModel for ScriptedModel {
    async fn extract_value(&self, _system: &str, user: &str, _schema: Value) -> Result<Value> {
        self.prompts.lock().unwrap().push(user.to_string());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Value(value)) => Ok(value),
            Some(Scripted::Error(message)) => Err(anyhow!(message)),
            Some(Scripted::Hang) => std::future::pending().await,
            None => bail!("ScriptedModel: script exhausted"),
        }
    }
}

// ---------------------------------------------------------------------------
// MockFilter
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum FilterMode {
    Verdict(RelevanceVerdict),
    Fail(String),
    Malformed(String),
    Hang,
}

/// Relevance filter keyed by external id, with a default for everything else.
pub struct MockFilter {
    default: FilterMode,
    by_id: HashMap<String, FilterMode>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockFilter {
    fn with_default(default: FilterMode) -> Self {
        Self {
            default,
            by_id: HashMap::new(),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Approves everything as Technical, English.
    pub fn approving() -> Self {
        Self::with_default(FilterMode::Verdict(technical_verdict()))
    }

    pub fn rejecting(rationale: &str) -> Self {
        Self::with_default(FilterMode::Verdict(rejected_verdict(rationale)))
    }

    pub fn failing(message: &str) -> Self {
        Self::with_default(FilterMode::Fail(message.to_string()))
    }

    pub fn malformed(message: &str) -> Self {
        Self::with_default(FilterMode::Malformed(message.to_string()))
    }

    pub fn hanging() -> Self {
        Self::with_default(FilterMode::Hang)
    }

    pub fn on_candidate(mut self, external_id: &str, verdict: RelevanceVerdict) -> Self {
        self.by_id
            .insert(external_id.to_string(), FilterMode::Verdict(verdict));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelevanceFilter for MockFilter {
    async fn evaluate(&self, candidate: &CandidateContent) -> Result<RelevanceVerdict, FilterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mode = self
            .by_id
            .get(&candidate.key.external_id)
            .unwrap_or(&self.default)
            .clone();
        match mode {
            FilterMode::Verdict(verdict) => Ok(verdict),
            FilterMode::Fail(message) => Err(FilterError::Upstream(message)),
            FilterMode::Malformed(message) => Err(FilterError::Malformed(message)),
            FilterMode::Hang => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// CountingAssembler
// ---------------------------------------------------------------------------

/// Real context assembly, with a call counter in front.
pub struct CountingAssembler {
    inner: Arc<dyn ContextBuilder>,
    calls: AtomicUsize,
}

impl CountingAssembler {
    pub fn new(inner: Arc<dyn ContextBuilder>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContextBuilder for CountingAssembler {
    async fn build(
        &self,
        candidate: &CandidateContent,
        verdict: &RelevanceVerdict,
    ) -> Result<EngagementContext, AssemblyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.build(candidate, verdict).await
    }
}

// ---------------------------------------------------------------------------
// MockGenerator
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum GeneratorMode {
    Respond(GeneratedResponse),
    Violate,
    Hang,
}

pub struct MockGenerator {
    mode: GeneratorMode,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockGenerator {
    fn with_mode(mode: GeneratorMode) -> Self {
        Self {
            mode,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn responding(confidence: u8) -> Self {
        Self::with_mode(GeneratorMode::Respond(response(confidence)))
    }

    /// Fails as if both attempts broke the character limit.
    pub fn violating() -> Self {
        Self::with_mode(GeneratorMode::Violate)
    }

    pub fn hanging() -> Self {
        Self::with_mode(GeneratorMode::Hang)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentGenerator for MockGenerator {
    async fn write(&self, context: &EngagementContext) -> Result<GeneratedResponse, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.mode.clone() {
            GeneratorMode::Respond(response) => Ok(response),
            GeneratorMode::Violate => Err(GenerationError::ConstraintViolation {
                attempts: 2,
                violations: vec![Violation::TooLong {
                    chars: context.style.char_limit + 20,
                    limit: context.style.char_limit,
                }],
            }),
            GeneratorMode::Hang => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Context sources
// ---------------------------------------------------------------------------

pub struct StaticSimilarity {
    result: Result<Vec<PriorExcerpt>, String>,
    snippets: Mutex<Vec<String>>,
}

impl StaticSimilarity {
    pub fn returning(excerpts: Vec<PriorExcerpt>) -> Self {
        Self {
            result: Ok(excerpts),
            snippets: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            result: Err("vector index offline".into()),
            snippets: Mutex::new(Vec::new()),
        }
    }

    /// Query snippets received, in call order.
    pub fn snippets(&self) -> Vec<String> {
        self.snippets.lock().unwrap().clone()
    }
}

#[async_trait]
impl SimilaritySearch for StaticSimilarity {
    async fn similar_responses(&self, snippet: &str, _limit: usize) -> Result<Vec<PriorExcerpt>> {
        self.snippets.lock().unwrap().push(snippet.to_string());
        self.result.clone().map_err(|e| anyhow!(e))
    }
}

enum ProfileMode {
    Found(AudienceDossier),
    Unavailable,
    Failing,
    Hanging,
}

pub struct StaticProfiler {
    mode: ProfileMode,
    calls: AtomicUsize,
}

impl StaticProfiler {
    fn with_mode(mode: ProfileMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn found(dossier: AudienceDossier) -> Self {
        Self::with_mode(ProfileMode::Found(dossier))
    }

    pub fn unavailable() -> Self {
        Self::with_mode(ProfileMode::Unavailable)
    }

    pub fn failing() -> Self {
        Self::with_mode(ProfileMode::Failing)
    }

    pub fn hanging() -> Self {
        Self::with_mode(ProfileMode::Hanging)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudienceProfiler for StaticProfiler {
    async fn profile(&self, _author: &Author, _platform: Platform) -> Result<ProfileLookup> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.mode {
            ProfileMode::Found(dossier) => Ok(ProfileLookup::Found(dossier.clone())),
            ProfileMode::Unavailable => Ok(ProfileLookup::Unavailable),
            ProfileMode::Failing => bail!("profile service returned 500"),
            ProfileMode::Hanging => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryAuditSink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
    failing: AtomicBool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Event types for one candidate, in emission order.
    pub fn events_for(&self, key: &CandidateKey) -> Vec<&'static str> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| &r.key == key)
            .map(|r| r.event.event_type())
            .collect()
    }

    pub fn stages_for(&self, key: &CandidateKey) -> Vec<Stage> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| &r.key == key)
            .map(|r| r.stage)
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn emit(&self, record: &AuditRecord) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("audit sink unavailable");
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TestPipeline
// ---------------------------------------------------------------------------

/// A real Orchestrator and Ledger over in-memory mocks.
pub struct TestPipeline {
    pub orchestrator: Orchestrator,
    pub store: Arc<MemoryLedgerStore>,
    pub filter: Arc<MockFilter>,
    pub assembler: Arc<CountingAssembler>,
    pub generator: Arc<MockGenerator>,
    pub audit: Arc<MemoryAuditSink>,
}

impl TestPipeline {
    pub fn builder() -> TestPipelineBuilder {
        TestPipelineBuilder {
            filter: MockFilter::approving(),
            generator: MockGenerator::responding(85),
            store: MemoryLedgerStore::new(),
            caps: BudgetCaps::new(5),
            config: PipelineConfig::default(),
            styles: StyleBook::defaults(),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        self.orchestrator.ledger()
    }

    pub fn count_today(&self, platform: Platform) -> u32 {
        self.store.count(platform, test_day())
    }
}

pub struct TestPipelineBuilder {
    filter: MockFilter,
    generator: MockGenerator,
    store: MemoryLedgerStore,
    caps: BudgetCaps,
    config: PipelineConfig,
    styles: StyleBook,
}

impl TestPipelineBuilder {
    pub fn filter(mut self, filter: MockFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn generator(mut self, generator: MockGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub fn store(mut self, store: MemoryLedgerStore) -> Self {
        self.store = store;
        self
    }

    pub fn cap(mut self, cap: u32) -> Self {
        self.caps = BudgetCaps::new(cap);
        self
    }

    pub fn threshold(mut self, threshold: u8) -> Self {
        self.config.confidence_threshold = threshold;
        self
    }

    pub fn filter_timeout(mut self, timeout: Duration) -> Self {
        self.config.filter_timeout = timeout;
        self
    }

    pub fn generator_timeout(mut self, timeout: Duration) -> Self {
        self.config.generator_timeout = timeout;
        self
    }

    pub fn styles(mut self, styles: StyleBook) -> Self {
        self.styles = styles;
        self
    }

    pub fn build(self) -> TestPipeline {
        let store = Arc::new(self.store);
        let filter = Arc::new(self.filter);
        let generator = Arc::new(self.generator);
        let audit = Arc::new(MemoryAuditSink::new());
        let assembler = Arc::new(CountingAssembler::new(Arc::new(ContextAssembler::new(
            Arc::new(self.styles),
        ))));

        let day = test_day();
        let ledger = Ledger::with_clock(store.clone(), self.caps, Arc::new(move || day));

        let orchestrator = Orchestrator::new(
            PipelineDeps::builder()
                .ledger(ledger)
                .filter(filter.clone())
                .assembler(assembler.clone())
                .generator(generator.clone())
                .audit(audit.clone())
                .config(self.config)
                .build(),
        );

        TestPipeline {
            orchestrator,
            store,
            filter,
            assembler,
            generator,
            audit,
        }
    }
}

// ---------------------------------------------------------------------------
// Builders for domain values
// ---------------------------------------------------------------------------

pub fn technical_verdict() -> RelevanceVerdict {
    RelevanceVerdict {
        should_engage: true,
        category: Category::Technical,
        language: "en".into(),
        rationale: "Software engineering topic".into(),
    }
}

pub fn rejected_verdict(rationale: &str) -> RelevanceVerdict {
    RelevanceVerdict {
        should_engage: false,
        category: Category::Other,
        language: "en".into(),
        rationale: rationale.into(),
    }
}

pub fn response(confidence: u8) -> GeneratedResponse {
    GeneratedResponse {
        text: "Readiness checks before HPA tuning, or you just scale broken pods faster.".into(),
        confidence,
        rationale: "Concrete operational tip".into(),
        attempts: 1,
    }
}

pub fn dossier() -> AudienceDossier {
    AudienceDossier {
        summary: "Platform engineer writing about Kubernetes".into(),
        technical_level: TechnicalLevel::Expert,
        job_title: "SRE".into(),
        is_hype_seller: false,
        tone_preference: "direct".into(),
        interests: vec!["kubernetes".into(), "observability".into()],
        interaction_guidelines: "Talk numbers, not vibes.".into(),
    }
}

/// An X post with the given id, body and reply count.
pub fn post(external_id: &str, body: &str, replies: u32) -> CandidateContent {
    CandidateContent::new(Platform::X, external_id, "dev_ops", body).with_metrics(replies, 40)
}

/// A minimal context as the assembler would produce for an X post.
pub fn context_for(language: &str, char_limit: usize) -> EngagementContext {
    EngagementContext {
        key: CandidateKey::new(Platform::X, "p1"),
        author_handle: "dev_ops".into(),
        body: "How we tuned the HPA for bursty traffic".into(),
        media: None,
        reply_count: 14,
        like_count: 40,
        category: Category::Technical,
        language: language.into(),
        strength: EngagementStrength::High,
        strategy: "engage with specific points already raised".into(),
        audience_profile: None,
        prior_excerpts: None,
        existing_replies: None,
        style: StyleRule::new(char_limit, "technical and direct"),
        gaps: Vec::new(),
    }
}
