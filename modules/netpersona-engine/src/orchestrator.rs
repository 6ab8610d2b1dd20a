//! Decision orchestrator: one candidate in, one [`Decision`] out.
//!
//! An explicit linear state machine:
//!
//! ```text
//! Received -> LedgerChecked -> Filtered -> ContextBuilt -> Generated -> Gated -> Terminal
//! ```
//!
//! Any stage may jump straight to `Terminal(Skip)`. Only ledger or audit
//! storage failures leave without a decision, as [`PipelineError`]. The
//! [`Reservation`] rides along in the state, so dropping the run future at
//! any await point releases it with no persisted change.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use netpersona_common::{
    CandidateContent, Config, Decision, EngagementContext, GeneratedResponse, RelevanceVerdict,
    SkipReason, Stage,
};

use crate::audit::{AuditEvent, AuditRecord, LedgerResult};
use crate::error::{FilterError, GenerationError, PipelineError};
use crate::ledger::{CommitOutcome, Ledger, LedgerCheck, Reservation};
use crate::traits::{AuditSink, ContentGenerator, ContextBuilder, RelevanceFilter};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Act only at or above this confidence.
    pub confidence_threshold: u8,
    pub filter_timeout: Duration,
    /// Covers every generator attempt together.
    pub generator_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 70,
            filter_timeout: Duration::from_secs(20),
            generator_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&Config> for PipelineConfig {
    fn from(config: &Config) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            filter_timeout: config.filter_timeout,
            generator_timeout: config.generator_timeout,
        }
    }
}

/// Everything the orchestrator runs on.
#[derive(TypedBuilder)]
pub struct PipelineDeps {
    pub ledger: Ledger,
    pub filter: Arc<dyn RelevanceFilter>,
    pub assembler: Arc<dyn ContextBuilder>,
    pub generator: Arc<dyn ContentGenerator>,
    pub audit: Arc<dyn AuditSink>,
    #[builder(default)]
    pub config: PipelineConfig,
}

enum RunState {
    Received,
    LedgerChecked {
        reservation: Reservation,
    },
    Filtered {
        reservation: Reservation,
        verdict: RelevanceVerdict,
    },
    ContextBuilt {
        reservation: Reservation,
        context: EngagementContext,
    },
    Generated {
        reservation: Reservation,
        response: GeneratedResponse,
    },
    Gated {
        reservation: Reservation,
        response: GeneratedResponse,
        passed: bool,
    },
    Terminal(Decision),
}

/// Per-run identity threaded through every step.
struct Run<'a> {
    id: Uuid,
    candidate: &'a CandidateContent,
}

pub struct Orchestrator {
    ledger: Ledger,
    filter: Arc<dyn RelevanceFilter>,
    assembler: Arc<dyn ContextBuilder>,
    generator: Arc<dyn ContentGenerator>,
    audit: Arc<dyn AuditSink>,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(deps: PipelineDeps) -> Self {
        Self {
            ledger: deps.ledger,
            filter: deps.filter,
            assembler: deps.assembler,
            generator: deps.generator,
            audit: deps.audit,
            config: deps.config,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Run one candidate to a terminal decision.
    pub async fn process(&self, candidate: &CandidateContent) -> Result<Decision, PipelineError> {
        let run = Run {
            id: Uuid::new_v4(),
            candidate,
        };
        let mut state = RunState::Received;

        loop {
            state = match state {
                RunState::Terminal(decision) => return Ok(decision),
                RunState::Received => self.check_ledger(&run).await?,
                RunState::LedgerChecked { reservation } => self.check_relevance(&run, reservation).await?,
                RunState::Filtered {
                    reservation,
                    verdict,
                } => self.assemble(&run, reservation, &verdict).await?,
                RunState::ContextBuilt {
                    reservation,
                    context,
                } => self.generate(&run, reservation, &context).await?,
                RunState::Generated {
                    reservation,
                    response,
                } => {
                    let passed = response.confidence >= self.config.confidence_threshold;
                    RunState::Gated {
                        reservation,
                        response,
                        passed,
                    }
                }
                RunState::Gated {
                    reservation,
                    response,
                    passed,
                } => self.gate(&run, reservation, response, passed).await?,
            };
        }
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    async fn check_ledger(&self, run: &Run<'_>) -> Result<RunState, PipelineError> {
        let key = &run.candidate.key;
        match self.ledger.check_and_reserve(key).await? {
            LedgerCheck::Proceed(reservation) => {
                self.emit(run, Stage::Ledger, ledger_event(LedgerResult::Proceed, None))
                    .await?;
                Ok(RunState::LedgerChecked { reservation })
            }
            LedgerCheck::AlreadyProcessed(prior) => {
                info!(candidate = %key, prior_run = %prior.run_id, "Already processed");
                self.emit(
                    run,
                    Stage::Ledger,
                    ledger_event(LedgerResult::AlreadyProcessed, None),
                )
                .await?;
                Ok(RunState::Terminal(prior))
            }
            LedgerCheck::InFlight => {
                self.emit(run, Stage::Ledger, ledger_event(LedgerResult::InFlight, None))
                    .await?;
                let decision = Decision::skip(
                    key.clone(),
                    run.id,
                    Stage::Ledger,
                    SkipReason::Duplicate,
                    "Candidate is being processed by another run",
                );
                self.terminal(run, decision).await
            }
            LedgerCheck::BudgetExhausted(state) => {
                self.emit(
                    run,
                    Stage::Ledger,
                    ledger_event(LedgerResult::BudgetExhausted, Some((state.count, state.cap))),
                )
                .await?;
                let decision = Decision::skip(
                    key.clone(),
                    run.id,
                    Stage::Ledger,
                    SkipReason::BudgetExhausted,
                    format!("Daily cap reached: {state}"),
                );
                self.terminal(run, decision).await
            }
        }
    }

    async fn check_relevance(&self, run: &Run<'_>, reservation: Reservation) -> Result<RunState, PipelineError> {
        let timeout = self.config.filter_timeout;
        let verdict = match tokio::time::timeout(timeout, self.filter.evaluate(run.candidate)).await {
            Ok(result) => result,
            Err(_) => Err(FilterError::Timeout(timeout)),
        };

        match verdict {
            Ok(verdict) => {
                self.emit(
                    run,
                    Stage::Filter,
                    AuditEvent::Verdict {
                        should_engage: verdict.should_engage,
                        category: verdict.category,
                        language: verdict.language.clone(),
                        rationale: verdict.rationale.clone(),
                    },
                )
                .await?;

                if !verdict.should_engage {
                    let decision = Decision::skip(
                        run.candidate.key.clone(),
                        run.id,
                        Stage::Filter,
                        SkipReason::Irrelevant,
                        verdict.rationale,
                    );
                    return self.skip(run, reservation, decision).await;
                }
                Ok(RunState::Filtered {
                    reservation,
                    verdict,
                })
            }
            Err(e) => {
                warn!(candidate = %run.candidate.key, error = %e, "Filter failed");
                self.emit(run, Stage::Filter, AuditEvent::FilterFailed { error: e.to_string() })
                    .await?;
                let decision = Decision::skip(
                    run.candidate.key.clone(),
                    run.id,
                    Stage::Filter,
                    SkipReason::FilterError,
                    e.to_string(),
                );
                self.skip(run, reservation, decision).await
            }
        }
    }

    async fn assemble(
        &self,
        run: &Run<'_>,
        reservation: Reservation,
        verdict: &RelevanceVerdict,
    ) -> Result<RunState, PipelineError> {
        match self.assembler.build(run.candidate, verdict).await {
            Ok(context) => {
                self.emit(
                    run,
                    Stage::Context,
                    AuditEvent::ContextBuilt {
                        strength: context.strength,
                        strategy: context.strategy.clone(),
                        has_profile: context.audience_profile.is_some(),
                        prior_excerpts: context.prior_excerpts.as_ref().map_or(0, Vec::len),
                        existing_replies: context.existing_replies.as_ref().map_or(0, Vec::len),
                        gaps: context.gaps.clone(),
                    },
                )
                .await?;
                Ok(RunState::ContextBuilt {
                    reservation,
                    context,
                })
            }
            Err(e) => {
                warn!(candidate = %run.candidate.key, error = %e, "Context assembly failed");
                self.emit(run, Stage::Context, AuditEvent::AssemblyFailed { error: e.to_string() })
                    .await?;
                let decision = Decision::skip(
                    run.candidate.key.clone(),
                    run.id,
                    Stage::Context,
                    SkipReason::AssemblyFailed,
                    e.to_string(),
                );
                self.skip(run, reservation, decision).await
            }
        }
    }

    async fn generate(
        &self,
        run: &Run<'_>,
        reservation: Reservation,
        context: &EngagementContext,
    ) -> Result<RunState, PipelineError> {
        let timeout = self.config.generator_timeout;
        let generated = match tokio::time::timeout(timeout, self.generator.write(context)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout(timeout)),
        };

        match generated {
            Ok(response) => {
                self.emit(
                    run,
                    Stage::Generator,
                    AuditEvent::Generated {
                        confidence: response.confidence,
                        chars: response.text.chars().count(),
                        attempts: response.attempts,
                    },
                )
                .await?;
                Ok(RunState::Generated {
                    reservation,
                    response,
                })
            }
            Err(e) => {
                let timed_out = matches!(e, GenerationError::Timeout(_));
                warn!(candidate = %run.candidate.key, error = %e, timed_out, "Generation failed");
                self.emit(
                    run,
                    Stage::Generator,
                    AuditEvent::GenerationFailed {
                        error: e.to_string(),
                        timed_out,
                    },
                )
                .await?;
                let reason = if timed_out {
                    SkipReason::GenerationTimeout
                } else {
                    SkipReason::GenerationFailed
                };
                let decision = Decision::skip(
                    run.candidate.key.clone(),
                    run.id,
                    Stage::Generator,
                    reason,
                    e.to_string(),
                );
                self.skip(run, reservation, decision).await
            }
        }
    }

    async fn gate(
        &self,
        run: &Run<'_>,
        reservation: Reservation,
        response: GeneratedResponse,
        passed: bool,
    ) -> Result<RunState, PipelineError> {
        let key = &run.candidate.key;

        if !passed {
            let decision = Decision::skip(
                key.clone(),
                run.id,
                Stage::Gate,
                SkipReason::LowConfidence,
                format!(
                    "Confidence {} below threshold {}: {}",
                    response.confidence, self.config.confidence_threshold, response.rationale
                ),
            )
            .with_confidence(response.confidence);
            return self.skip(run, reservation, decision).await;
        }

        let decision = Decision::act(key.clone(), run.id, &response);
        match self.ledger.commit(reservation, &decision).await? {
            CommitOutcome::Committed(state) => {
                info!(
                    candidate = %key,
                    confidence = response.confidence,
                    count = state.count,
                    cap = state.cap,
                    "Act committed"
                );
                self.terminal(run, decision).await
            }
            CommitOutcome::CapReached(state) => {
                let decision = Decision::skip(
                    key.clone(),
                    run.id,
                    Stage::Gate,
                    SkipReason::BudgetExhausted,
                    format!("Daily cap reached before commit: {state}"),
                )
                .with_confidence(response.confidence);
                self.terminal(run, decision).await
            }
        }
    }

    // -----------------------------------------------------------------------
    // Terminal handling
    // -----------------------------------------------------------------------

    /// Record a skip in the processed set, then finish.
    async fn skip(
        &self,
        run: &Run<'_>,
        reservation: Reservation,
        decision: Decision,
    ) -> Result<RunState, PipelineError> {
        self.ledger.record_skip(reservation, &decision).await?;
        self.terminal(run, decision).await
    }

    async fn terminal(&self, run: &Run<'_>, decision: Decision) -> Result<RunState, PipelineError> {
        info!(
            candidate = %decision.key,
            outcome = ?decision.outcome,
            reason = decision.reason.map(|r| r.as_str()).unwrap_or("-"),
            stage = %decision.stage,
            "Decision"
        );
        self.emit(
            run,
            decision.stage,
            AuditEvent::Terminal {
                outcome: decision.outcome,
                reason: decision.reason,
                confidence: decision.confidence,
                decided_by: decision.stage,
            },
        )
        .await?;
        Ok(RunState::Terminal(decision))
    }

    async fn emit(&self, run: &Run<'_>, stage: Stage, event: AuditEvent) -> Result<(), PipelineError> {
        let record = AuditRecord::new(run.id, run.candidate.key.clone(), stage, event);
        self.audit
            .emit(&record)
            .await
            .map_err(PipelineError::AuditUnavailable)
    }
}

fn ledger_event(result: LedgerResult, budget: Option<(u32, u32)>) -> AuditEvent {
    AuditEvent::LedgerChecked {
        result,
        count: budget.map(|(count, _)| count),
        cap: budget.map(|(_, cap)| cap),
    }
}
