//! tristore: one-shot product sync
//!
//! Pulls changed products from Airtable into Notion, then from Notion into
//! Moloni, persisting a cursor per leg so the next run only sees new
//! changes.
//!
//! Usage:
//!   tristore --config tristore.json --cursor-db tristore-cursors.db
//!
//! Credentials come from flags or `AIRTABLE_API_KEY`, `NOTION_SECRET`,
//! `MOLONI_CLIENT_ID` and `MOLONI_CLIENT_SECRET`.

use std::{path::PathBuf, process::ExitCode};
use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use tristore_cli::{build_pipeline, PipelineConfig, ReadOnlyCursors, Secrets};
use tristore_sync::{CursorStore, RunOutcome, SqliteCursorStore};

#[derive(Parser, Debug)]
#[command(name = "tristore")]
#[command(about = "Incremental Airtable → Notion → Moloni product sync")]
struct Args {
    /// Path to the JSON pipeline file
    #[arg(short, long, default_value = "tristore.json")]
    config: PathBuf,

    /// Path to the SQLite cursor database
    #[arg(long, default_value = "tristore-cursors.db")]
    cursor_db: PathBuf,

    /// Simulate only the invoicing store (Moloni) in memory and keep cursors
    /// unchanged. Notion pages are still created and updated.
    #[arg(long)]
    dry_run: bool,

    /// Print the stored cursors and exit
    #[arg(long)]
    show_cursors: bool,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,

    #[arg(long, env = "AIRTABLE_API_KEY", hide_env_values = true)]
    airtable_api_key: Option<String>,

    #[arg(long, env = "NOTION_SECRET", hide_env_values = true)]
    notion_secret: Option<String>,

    #[arg(long, env = "MOLONI_CLIENT_ID", hide_env_values = true)]
    moloni_client_id: Option<String>,

    #[arg(long, env = "MOLONI_CLIENT_SECRET", hide_env_values = true)]
    moloni_client_secret: Option<String>,
}

fn init_logging(verbose: bool) {
    let builder = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();
    if std::env::var_os("RUST_LOG").is_some() {
        builder.with_env_filter(EnvFilter::from_default_env()).init();
    } else {
        let log_level = if verbose { Level::DEBUG } else { Level::INFO };
        builder.with_max_level(log_level).init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.verbose);

    let cursors = SqliteCursorStore::open(&args.cursor_db)
        .with_context(|| format!("Failed to open cursor db {}", args.cursor_db.display()))?;

    if args.show_cursors {
        let stored = cursors.list()?;
        println!("{}", serde_json::to_string_pretty(&stored)?);
        return Ok(ExitCode::SUCCESS);
    }

    let secrets = Secrets {
        airtable_api_key: args.airtable_api_key,
        notion_secret: args.notion_secret,
        moloni_client_id: args.moloni_client_id,
        moloni_client_secret: args.moloni_client_secret,
    };
    let config = PipelineConfig::load(&args.config)?.with_secrets(secrets);
    let pipeline = build_pipeline(config, args.dry_run)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight records");
            on_signal.cancel();
        }
    });

    info!("tristore starting (dry run: {})", args.dry_run);
    let read_only = ReadOnlyCursors::new(&cursors);
    let store: &dyn CursorStore = if args.dry_run { &read_only } else { &cursors };
    let summary = pipeline.orchestrator.run_with_store(store, &cancel).await?;

    if let Some(target) = &pipeline.dry_run_target {
        info!(
            "Dry run: {} invoicing writes captured in memory",
            target.calls().writes()
        );
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(match summary.outcome {
        RunOutcome::Done => ExitCode::SUCCESS,
        RunOutcome::Failed { .. } => ExitCode::FAILURE,
        RunOutcome::Cancelled => ExitCode::from(130),
    })
}
