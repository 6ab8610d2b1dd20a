//! Per-stage audit trail. One record per stage entered, plus one terminal
//! record per run. Records are structured; sinks decide where they go.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use netpersona_common::{
    AssemblyGap, CandidateKey, Category, EngagementStrength, Outcome, SkipReason, Stage,
};

use crate::traits::AuditSink;

// ---------------------------------------------------------------------------
// AuditRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub run_id: Uuid,
    pub key: CandidateKey,
    pub stage: Stage,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

impl AuditRecord {
    pub fn new(run_id: Uuid, key: CandidateKey, stage: Stage, event: AuditEvent) -> Self {
        Self {
            run_id,
            key,
            stage,
            at: Utc::now(),
            event,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerResult {
    Proceed,
    AlreadyProcessed,
    InFlight,
    BudgetExhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    LedgerChecked {
        result: LedgerResult,
        count: Option<u32>,
        cap: Option<u32>,
    },
    Verdict {
        should_engage: bool,
        category: Category,
        language: String,
        rationale: String,
    },
    FilterFailed {
        error: String,
    },
    ContextBuilt {
        strength: EngagementStrength,
        strategy: String,
        has_profile: bool,
        prior_excerpts: usize,
        existing_replies: usize,
        gaps: Vec<AssemblyGap>,
    },
    AssemblyFailed {
        error: String,
    },
    Generated {
        confidence: u8,
        chars: usize,
        attempts: u8,
    },
    GenerationFailed {
        error: String,
        timed_out: bool,
    },
    Terminal {
        outcome: Outcome,
        reason: Option<SkipReason>,
        confidence: Option<u8>,
        decided_by: Stage,
    },
}

impl AuditEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            AuditEvent::LedgerChecked { .. } => "ledger_checked",
            AuditEvent::Verdict { .. } => "verdict",
            AuditEvent::FilterFailed { .. } => "filter_failed",
            AuditEvent::ContextBuilt { .. } => "context_built",
            AuditEvent::AssemblyFailed { .. } => "assembly_failed",
            AuditEvent::Generated { .. } => "generated",
            AuditEvent::GenerationFailed { .. } => "generation_failed",
            AuditEvent::Terminal { .. } => "terminal",
        }
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Writes each record as a structured log line.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn emit(&self, record: &AuditRecord) -> Result<()> {
        let payload = serde_json::to_string(&record.event)?;
        info!(
            run_id = %record.run_id,
            candidate = %record.key,
            stage = %record.stage,
            event = record.event.event_type(),
            payload = %payload,
            "audit"
        );
        Ok(())
    }
}

/// Sends every record to each inner sink in order. The first failure wins.
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl AuditSink for FanoutAuditSink {
    async fn emit(&self, record: &AuditRecord) -> Result<()> {
        for sink in &self.sinks {
            sink.emit(record).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpersona_common::Platform;
    use serde_json::json;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = AuditEvent::Terminal {
            outcome: Outcome::Skip,
            reason: Some(SkipReason::LowConfidence),
            confidence: Some(40),
            decided_by: Stage::Gate,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], json!("terminal"));
        assert_eq!(value["reason"], json!("low_confidence"));
        assert_eq!(value["decided_by"], json!("gate"));
        assert_eq!(event.event_type(), "terminal");
    }

    #[test]
    fn record_flattens_event_next_to_envelope() {
        let record = AuditRecord::new(
            Uuid::new_v4(),
            CandidateKey::new(Platform::X, "p1"),
            Stage::Filter,
            AuditEvent::FilterFailed {
                error: "timed out".into(),
            },
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], json!("filter_failed"));
        assert_eq!(value["stage"], json!("filter"));
        assert_eq!(value["key"]["external_id"], json!("p1"));

        let back: AuditRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back.event, record.event);
    }

    #[tokio::test]
    async fn fanout_stops_at_first_failing_sink() {
        struct Failing;

        #[async_trait]
        impl AuditSink for Failing {
            async fn emit(&self, _record: &AuditRecord) -> Result<()> {
                anyhow::bail!("disk full")
            }
        }

        let sink = FanoutAuditSink::new(vec![Arc::new(TracingAuditSink), Arc::new(Failing)]);
        let record = AuditRecord::new(
            Uuid::new_v4(),
            CandidateKey::new(Platform::X, "p1"),
            Stage::Ledger,
            AuditEvent::LedgerChecked {
                result: LedgerResult::Proceed,
                count: Some(0),
                cap: Some(15),
            },
        );
        assert!(sink.emit(&record).await.is_err());
    }
}
