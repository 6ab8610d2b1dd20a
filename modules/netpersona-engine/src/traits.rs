// Seams between the orchestrator and everything that talks to the outside.
//
// Stage traits (RelevanceFilter, ContextBuilder, ContentGenerator) are what the
// orchestrator drives. Collaborator traits (StructuredModel, SimilaritySearch,
// AudienceProfiler, StyleRules, LedgerStore, AuditSink) are what the stages and
// the ledger sit on. Every one of them has an in-memory stand-in in testing.rs.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;

use ai_client::{Claude, StructuredOutput};
use netpersona_common::{
    AudienceDossier, Author, CandidateContent, CandidateKey, Decision, EngagementContext,
    GeneratedResponse, Platform, PriorExcerpt, RelevanceVerdict, StyleBook, StyleRule,
};
use netpersona_store::{AuditLog, AuditRow, PgLedgerStore, ReplyHistory};

use crate::audit::AuditRecord;
use crate::error::{AssemblyError, FilterError, GenerationError};

// ---------------------------------------------------------------------------
// Stage traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RelevanceFilter: Send + Sync {
    async fn evaluate(&self, candidate: &CandidateContent) -> Result<RelevanceVerdict, FilterError>;
}

#[async_trait]
pub trait ContextBuilder: Send + Sync {
    async fn build(
        &self,
        candidate: &CandidateContent,
        verdict: &RelevanceVerdict,
    ) -> Result<EngagementContext, AssemblyError>;
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn write(&self, context: &EngagementContext) -> Result<GeneratedResponse, GenerationError>;
}

// ---------------------------------------------------------------------------
// StructuredModel: a language model forced to answer with a JSON schema
// ---------------------------------------------------------------------------

#[async_trait]
pub trait StructuredModel: Send + Sync {
    async fn extract_value(&self, system: &str, user: &str, schema: Value) -> Result<Value>;
}

#[async_trait]
impl StructuredModel for Claude {
    async fn extract_value(&self, system: &str, user: &str, schema: Value) -> Result<Value> {
        Claude::extract_value(self, system, user, schema).await
    }
}

/// Typed call through a [`StructuredModel`]. Transport failures and shape
/// failures come back distinguishable: the outer error is the call, the
/// inner one is deserialization.
pub async fn extract_structured<T: StructuredOutput>(
    model: &dyn StructuredModel,
    system: &str,
    user: &str,
) -> Result<Result<T, serde_json::Error>> {
    let value = model.extract_value(system, user, T::tool_schema()).await?;
    Ok(serde_json::from_value(value))
}

// ---------------------------------------------------------------------------
// Context sources
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SimilaritySearch: Send + Sync {
    /// Up to `limit` prior responses similar to `snippet`, best first.
    async fn similar_responses(&self, snippet: &str, limit: usize) -> Result<Vec<PriorExcerpt>>;
}

#[async_trait]
impl SimilaritySearch for ReplyHistory {
    async fn similar_responses(&self, snippet: &str, limit: usize) -> Result<Vec<PriorExcerpt>> {
        self.similar_replies(snippet, limit).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileLookup {
    Found(AudienceDossier),
    /// Not enough public information to say anything.
    Unavailable,
}

#[async_trait]
pub trait AudienceProfiler: Send + Sync {
    async fn profile(&self, author: &Author, platform: Platform) -> Result<ProfileLookup>;
}

pub trait StyleRules: Send + Sync {
    fn style_for(&self, platform: Platform) -> Option<StyleRule>;
}

impl StyleRules for StyleBook {
    fn style_for(&self, platform: Platform) -> Option<StyleRule> {
        self.get(platform).cloned()
    }
}

// ---------------------------------------------------------------------------
// LedgerStore: durable half of the ledger
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn prior_decision(&self, key: &CandidateKey) -> Result<Option<Decision>>;

    async fn daily_count(&self, platform: Platform, date: NaiveDate) -> Result<u32>;

    /// Record a skip decision in the processed set.
    async fn record_decision(&self, decision: &Decision) -> Result<()>;

    /// Record an act decision and increment the day's count atomically,
    /// unless the count already reached `cap`. Returns the new count, or
    /// `None` with nothing written when the cap was reached. Fails without
    /// side effects if the candidate was already recorded.
    async fn record_act(&self, decision: &Decision, date: NaiveDate, cap: u32) -> Result<Option<u32>>;
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn prior_decision(&self, key: &CandidateKey) -> Result<Option<Decision>> {
        PgLedgerStore::prior_decision(self, key).await
    }

    async fn daily_count(&self, platform: Platform, date: NaiveDate) -> Result<u32> {
        PgLedgerStore::daily_count(self, platform, date).await
    }

    async fn record_decision(&self, decision: &Decision) -> Result<()> {
        PgLedgerStore::record_decision(self, decision).await
    }

    async fn record_act(&self, decision: &Decision, date: NaiveDate, cap: u32) -> Result<Option<u32>> {
        PgLedgerStore::record_act(self, decision, date, cap).await
    }
}

// ---------------------------------------------------------------------------
// AuditSink
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn emit(&self, record: &AuditRecord) -> Result<()>;
}

#[async_trait]
impl AuditSink for AuditLog {
    async fn emit(&self, record: &AuditRecord) -> Result<()> {
        let row = AuditRow {
            run_id: record.run_id,
            key: record.key.clone(),
            stage: record.stage,
            event_type: record.event.event_type().to_string(),
            payload: serde_json::to_value(&record.event)
                .map_err(|e| anyhow!("Unserializable audit event: {e}"))?,
            ts: record.at,
        };
        self.append(&row).await?;
        Ok(())
    }
}
