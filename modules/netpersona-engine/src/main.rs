use std::path::PathBuf;
use std::sync::Arc;

use ai_client::Claude;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::info;
use tracing_subscriber::EnvFilter;

use netpersona_common::{CandidateContent, Config, Platform, StyleBook};
use netpersona_engine::audit::{FanoutAuditSink, TracingAuditSink};
use netpersona_engine::context::ContextAssembler;
use netpersona_engine::ghostwriter::Ghostwriter;
use netpersona_engine::judge::{Judge, TopicPolicy};
use netpersona_engine::ledger::{BudgetCaps, Ledger, MemoryLedgerStore};
use netpersona_engine::orchestrator::{Orchestrator, PipelineConfig, PipelineDeps};
use netpersona_engine::persona::Persona;
use netpersona_engine::profile::ProfileAnalyzer;
use netpersona_engine::ranking::rank_by_virality;
use netpersona_engine::stats::DecisionStats;
use netpersona_engine::traits::{AuditSink, LedgerStore, SimilaritySearch};
use netpersona_store::{AuditLog, PgLedgerStore, ReplyHistory};

#[derive(Parser)]
#[command(name = "netpersona", about = "Decide which social posts deserve a reply")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply database migrations
    Migrate,
    /// Run a batch of candidates through the decision pipeline
    Decide {
        /// JSON array of candidates
        #[arg(long)]
        input: PathBuf,
        /// Candidates processed at once
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
        /// Keep the ledger in memory and skip Postgres entirely
        #[arg(long)]
        ephemeral: bool,
    },
    /// Show today's interaction count for one platform
    Budget {
        #[arg(long)]
        platform: Platform,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("netpersona=info".parse()?))
        .init();

    match Cli::parse().command {
        Command::Migrate => migrate().await,
        Command::Decide {
            input,
            concurrency,
            ephemeral,
        } => decide(input, concurrency.max(1), ephemeral).await,
        Command::Budget { platform } => budget(platform).await,
    }
}

async fn migrate() -> Result<()> {
    let config = Config::store_from_env()?;
    config.log_redacted();

    let pool = netpersona_store::connect(config.require_database_url()?).await?;
    netpersona_store::migrate(&pool).await?;
    info!("Migrations applied");
    Ok(())
}

async fn budget(platform: Platform) -> Result<()> {
    let config = Config::store_from_env()?;
    let pool = netpersona_store::connect(config.require_database_url()?).await?;
    let ledger = Ledger::new(
        Arc::new(PgLedgerStore::new(pool)),
        BudgetCaps::from(&config),
    );

    let state = ledger.budget_state(platform).await?;
    println!("{state} ({} remaining)", state.remaining());
    Ok(())
}

async fn decide(input: PathBuf, concurrency: usize, ephemeral: bool) -> Result<()> {
    let config = Config::from_env()?;
    config.log_redacted();

    let raw = std::fs::read_to_string(&input)
        .with_context(|| format!("Cannot read candidates from {}", input.display()))?;
    let candidates: Vec<CandidateContent> =
        serde_json::from_str(&raw).context("Candidates file is not a JSON array of candidates")?;
    info!(count = candidates.len(), concurrency, ephemeral, "Candidates loaded");

    let backend = if ephemeral {
        Backend {
            store: Arc::new(MemoryLedgerStore::new()),
            audit: Arc::new(TracingAuditSink),
            history: None,
        }
    } else {
        let pool = netpersona_store::connect(config.require_database_url()?).await?;
        Backend {
            store: Arc::new(PgLedgerStore::new(pool.clone())),
            audit: Arc::new(FanoutAuditSink::new(vec![
                Arc::new(TracingAuditSink),
                Arc::new(AuditLog::new(pool.clone())),
            ])),
            history: Some(Arc::new(ReplyHistory::new(pool))),
        }
    };

    let orchestrator = build_orchestrator(&config, backend)?;

    let decisions: Vec<_> = stream::iter(rank_by_virality(candidates))
        .map(|candidate| {
            let orchestrator = &orchestrator;
            async move { orchestrator.process(&candidate).await }
        })
        .buffer_unordered(concurrency)
        .try_collect()
        .await?;

    let mut stats = DecisionStats::default();
    for decision in &decisions {
        stats.record(decision);
    }
    println!("{}", serde_json::to_string_pretty(&decisions)?);
    info!("{stats}");
    Ok(())
}

/// Where decisions, audit records and reply history live for one run.
struct Backend {
    store: Arc<dyn LedgerStore>,
    audit: Arc<dyn AuditSink>,
    history: Option<Arc<dyn SimilaritySearch>>,
}

fn build_orchestrator(config: &Config, backend: Backend) -> Result<Orchestrator> {
    let judge_model = Arc::new(Claude::new(&config.anthropic_api_key, &config.judge_model));
    let profile_model = Arc::new(Claude::new(&config.anthropic_api_key, &config.judge_model));
    let writer_model = Arc::new(
        Claude::new(&config.anthropic_api_key, &config.ghostwriter_model).with_temperature(0.7),
    );

    let persona = match &config.persona_path {
        Some(path) => Persona::load(path)?,
        None => Persona::default(),
    };
    info!(persona = persona.name.as_str(), "Persona loaded");

    let mut assembler = ContextAssembler::new(Arc::new(StyleBook::defaults()))
        .with_profiler(Arc::new(ProfileAnalyzer::new(profile_model)), config.profile_timeout);
    if let Some(history) = backend.history {
        assembler = assembler.with_similarity(history);
    }

    Ok(Orchestrator::new(
        PipelineDeps::builder()
            .ledger(Ledger::new(backend.store, BudgetCaps::from(config)))
            .filter(Arc::new(Judge::new(judge_model, TopicPolicy::default())))
            .assembler(Arc::new(assembler))
            .generator(Arc::new(Ghostwriter::new(writer_model, persona)))
            .audit(backend.audit)
            .config(PipelineConfig::from(config))
            .build(),
    ))
}
