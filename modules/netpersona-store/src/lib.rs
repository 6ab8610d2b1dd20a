//! Postgres persistence for the engagement ledger, the stage audit trail and
//! the searchable history of sent replies.
//!
//! Domain types come from `netpersona-common`; this crate knows nothing about
//! how decisions are made, only how they are stored.

pub mod audit;
pub mod history;
pub mod ledger;

pub use audit::{AuditLog, AuditRow};
pub use history::ReplyHistory;
pub use ledger::PgLedgerStore;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Open a small pool. The pipeline is I/O-bound on the model, not the DB.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Apply embedded migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}
