use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use netpersona_common::{CandidateKey, Stage};

/// One audit entry. The payload is opaque JSON owned by the caller.
#[derive(Debug, Clone)]
pub struct AuditRow {
    pub run_id: Uuid,
    pub key: CandidateKey,
    pub stage: Stage,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub ts: DateTime<Utc>,
}

/// Append-only stage audit trail in `pipeline_audit`.
#[derive(Clone)]
pub struct AuditLog {
    pool: PgPool,
}

impl AuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, row: &AuditRow) -> Result<i64> {
        let (seq,) = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO pipeline_audit (ts, run_id, platform, external_id, stage, event_type, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING seq
            "#,
        )
        .bind(row.ts)
        .bind(row.run_id)
        .bind(row.key.platform.as_str())
        .bind(&row.key.external_id)
        .bind(row.stage.as_str())
        .bind(&row.event_type)
        .bind(&row.payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(seq)
    }

    /// Every stage record for one run, oldest first.
    pub async fn read_run(&self, run_id: Uuid) -> Result<Vec<(String, String, serde_json::Value)>> {
        let rows = sqlx::query_as::<_, (String, String, serde_json::Value)>(
            r#"
            SELECT stage, event_type, payload
            FROM pipeline_audit
            WHERE run_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
