use std::time::Duration;

use thiserror::Error;

use netpersona_common::Platform;

use crate::constraints::Violation;

/// Relevance filter failed to produce a usable verdict. Never treated as approval.
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Filter timed out after {0:?}")]
    Timeout(Duration),

    #[error("Filter call failed: {0}")]
    Upstream(String),

    #[error("Malformed filter output: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("No style rule for platform {0}")]
    StyleRuleMissing(Platform),
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Draft still violated constraints after {attempts} attempts: {}", join(.violations))]
    ConstraintViolation {
        attempts: u8,
        violations: Vec<Violation>,
    },

    #[error("Generator call failed after {attempts} attempts: {message}")]
    Upstream { attempts: u8, message: String },

    #[error("Generator timed out after {0:?}")]
    Timeout(Duration),
}

fn join(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger storage unavailable: {0}")]
    Storage(#[source] anyhow::Error),
}

/// Errors that halt a run without a decision. Every per-stage failure becomes
/// a Skip instead; only losing the ledger or the audit trail ends up here.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Audit sink unavailable: {0}")]
    AuditUnavailable(#[source] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_violation_lists_every_violation() {
        let err = GenerationError::ConstraintViolation {
            attempts: 2,
            violations: vec![
                Violation::TooLong { chars: 312, limit: 280 },
                Violation::BannedPhrase("great post".into()),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("2 attempts"));
        assert!(text.contains("312"));
        assert!(text.contains("great post"));
    }
}
