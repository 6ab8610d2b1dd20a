use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use sqlx::{PgExecutor, PgPool};
use tracing::debug;

use netpersona_common::{CandidateKey, Decision, Outcome, Platform};

// ---------------------------------------------------------------------------
// PgLedgerStore
// ---------------------------------------------------------------------------

/// Durable budget counters and processed-candidate set.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The recorded decision for a candidate, if it was ever decided.
    pub async fn prior_decision(&self, key: &CandidateKey) -> Result<Option<Decision>> {
        let row = sqlx::query_as::<_, (serde_json::Value,)>(
            r#"
            SELECT decision
            FROM processed_candidates
            WHERE platform = $1 AND external_id = $2
            "#,
        )
        .bind(key.platform.as_str())
        .bind(&key.external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(value,)| {
            serde_json::from_value(value)
                .with_context(|| format!("Corrupt decision row for {key}"))
        })
        .transpose()
    }

    /// Interactions committed on `date` for `platform`. 0 when no row exists yet.
    pub async fn daily_count(&self, platform: Platform, date: NaiveDate) -> Result<u32> {
        let row = sqlx::query_as::<_, (i32,)>(
            r#"
            SELECT interaction_count
            FROM daily_budget
            WHERE date = $1 AND platform = $2
            "#,
        )
        .bind(date)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(count,)| count.max(0) as u32).unwrap_or(0))
    }

    /// Append a skip decision to the processed set. Re-recording is a no-op.
    pub async fn record_decision(&self, decision: &Decision) -> Result<()> {
        let inserted = insert_decision(&self.pool, decision).await?;
        if inserted == 0 {
            debug!(candidate = %decision.key, "Decision already recorded");
        }
        Ok(())
    }

    /// Record an act decision and bump the day's counter in one transaction.
    /// Returns the new count, or `None` with nothing written when the day's
    /// count already reached `cap`.
    ///
    /// The cap is checked by the upsert itself. Postgres re-evaluates the
    /// `WHERE` on the locked row, so concurrent writers from any process
    /// cannot push the count past the cap.
    pub async fn record_act(&self, decision: &Decision, date: NaiveDate, cap: u32) -> Result<Option<u32>> {
        if decision.outcome != Outcome::Act {
            bail!("record_act called with a {:?} decision", decision.outcome);
        }
        if cap == 0 {
            return Ok(None);
        }

        let mut tx = self.pool.begin().await?;

        if insert_decision(&mut *tx, decision).await? == 0 {
            // tx drops here and rolls back; the counter is untouched
            bail!("Candidate {} was already recorded", decision.key);
        }

        let row = sqlx::query_as::<_, (i32,)>(
            r#"
            INSERT INTO daily_budget (date, platform, interaction_count)
            VALUES ($1, $2, 1)
            ON CONFLICT (date, platform)
            DO UPDATE SET interaction_count = daily_budget.interaction_count + 1,
                          updated_at = now()
            WHERE daily_budget.interaction_count < $3
            RETURNING interaction_count
            "#,
        )
        .bind(date)
        .bind(decision.key.platform.as_str())
        .bind(i32::try_from(cap).unwrap_or(i32::MAX))
        .fetch_optional(&mut *tx)
        .await?;

        let Some((count,)) = row else {
            debug!(candidate = %decision.key, cap, "Cap reached, act not recorded");
            tx.rollback().await?;
            return Ok(None);
        };

        tx.commit().await?;
        Ok(Some(count.max(0) as u32))
    }
}

async fn insert_decision<'e, E: PgExecutor<'e>>(executor: E, decision: &Decision) -> Result<u64> {
    let payload = serde_json::to_value(decision)?;
    let outcome = match decision.outcome {
        Outcome::Act => "act",
        Outcome::Skip => "skip",
    };

    let result = sqlx::query(
        r#"
        INSERT INTO processed_candidates
            (platform, external_id, outcome, reason, stage, run_id, decision, decided_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (platform, external_id) DO NOTHING
        "#,
    )
    .bind(decision.key.platform.as_str())
    .bind(&decision.key.external_id)
    .bind(outcome)
    .bind(decision.reason.map(|r| r.as_str()))
    .bind(decision.stage.as_str())
    .bind(decision.run_id)
    .bind(payload)
    .bind(decision.decided_at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}
