use std::collections::BTreeMap;

use netpersona_common::{Decision, Outcome};

/// Tally of one batch run, printed by the CLI when it finishes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DecisionStats {
    pub processed: u32,
    pub acted: u32,
    pub skipped: BTreeMap<&'static str, u32>,
}

impl DecisionStats {
    pub fn record(&mut self, decision: &Decision) {
        self.processed += 1;
        match (decision.outcome, decision.reason) {
            (Outcome::Act, _) => self.acted += 1,
            (Outcome::Skip, Some(reason)) => *self.skipped.entry(reason.as_str()).or_default() += 1,
            (Outcome::Skip, None) => *self.skipped.entry("unspecified").or_default() += 1,
        }
    }

    pub fn skipped_total(&self) -> u32 {
        self.skipped.values().sum()
    }
}

impl std::fmt::Display for DecisionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Decision Run Complete ===")?;
        writeln!(f, "Processed:          {}", self.processed)?;
        writeln!(f, "Acted:              {}", self.acted)?;
        writeln!(f, "Skipped:            {}", self.skipped_total())?;
        if !self.skipped.is_empty() {
            writeln!(f, "\nBy reason:")?;
            for (reason, count) in &self.skipped {
                writeln!(f, "  {reason:<19} {count}")?;
            }
        }
        Ok(())
    }
}
