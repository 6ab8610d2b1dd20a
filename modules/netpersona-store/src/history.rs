use anyhow::Result;
use sqlx::PgPool;

use netpersona_common::PriorExcerpt;

/// Past replies the pipeline acted on, searchable by text.
///
/// Full-text ranking over `processed_candidates` with the language-neutral
/// `simple` configuration. Any query word may match; more shared words
/// rank higher.
#[derive(Clone)]
pub struct ReplyHistory {
    pool: PgPool,
}

impl ReplyHistory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Up to `limit` acted replies matching `snippet`, best first.
    pub async fn similar_replies(&self, snippet: &str, limit: usize) -> Result<Vec<PriorExcerpt>> {
        if snippet.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, (String, f32)>(
            r#"
            WITH q AS (
                SELECT replace(plainto_tsquery('simple', $1)::text, '&', '|')::tsquery AS query
            )
            SELECT decision->>'response_text' AS text,
                   ts_rank(to_tsvector('simple', decision->>'response_text'), q.query) AS score
            FROM processed_candidates, q
            WHERE outcome = 'act'
              AND decision->>'response_text' IS NOT NULL
              AND to_tsvector('simple', decision->>'response_text') @@ q.query
            ORDER BY score DESC, decided_at DESC
            LIMIT $2
            "#,
        )
        .bind(snippet)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(text, score)| PriorExcerpt { text, score })
            .collect())
    }
}
