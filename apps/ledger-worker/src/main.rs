//! # ledger-worker
//!
//! Command-line entry point for the reconciliation pipeline and the
//! background job worker.
//!
//! ## Commands
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sync-list [--page-size N]     paged identity sweep, in the foreground  │
//! │  sync-details [LOCAL_ID]       one subscriber, or every one (bulk run)  │
//! │  pipeline [--page-size N]      list sweep + queue the bulk detail job   │
//! │  worker                        drain sync_jobs until Ctrl+C / SIGTERM   │
//! │  status                        queue counts and the last bulk run       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Logging follows `RUST_LOG` (default `info`).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ledger_db::{Database, DbConfig, JobStatus};
use ledger_sync::detail_reconciler::BULK_DETAILS_RUN;
use ledger_sync::{Engine, EngineConfig};

#[derive(Debug, Parser)]
#[command(name = "ledger-worker", version, about = "Subscriber ledger sync worker")]
struct Cli {
    /// Path to engine.toml (defaults to the platform config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sweep the remote subscriber list into the ledger.
    SyncList {
        #[arg(long)]
        page_size: Option<usize>,
    },
    /// Mirror full details for one subscriber, or for all of them.
    SyncDetails { local_id: Option<String> },
    /// List sweep, then queue the bulk detail job.
    Pipeline {
        #[arg(long)]
        page_size: Option<usize>,
    },
    /// Run the job worker until interrupted.
    Worker,
    /// Print queue and run status.
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let cli = Cli::parse();

    let config = EngineConfig::load(cli.config)?;
    let database_path = config
        .database_path()
        .ok_or("No database path configured and no platform data directory found")?;
    if let Some(parent) = database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    info!(base_url = %config.api_base(), db = %database_path.display(), "Configuration loaded");

    let db = Database::new(DbConfig::new(database_path)).await?;
    let engine = Engine::from_config(config, db)?;

    match cli.command {
        Command::SyncList { page_size } => {
            let page_size = page_size.unwrap_or(engine.config().sync.list_page_size);
            let report = engine.list_reconciler().sync_list(page_size).await?;
            println!(
                "fetched {} / created {} / updated {} / failed {}",
                report.fetched, report.created, report.updated, report.failed
            );
        }
        Command::SyncDetails { local_id: Some(local_id) } => {
            let report = engine.actions().refresh_subscriber_now(&local_id).await?;
            println!(
                "{}: written={} documents +{} ~{} -{}",
                local_id,
                report.written,
                report.documents.added,
                report.documents.updated,
                report.documents.removed
            );
        }
        Command::SyncDetails { local_id: None } => {
            let report = engine.bulk_detail_reconciler().sync_all_details().await?;
            println!(
                "run {}: {} of {} succeeded ({:?})",
                report.run_id, report.succeeded, report.total, report.status
            );
        }
        Command::Pipeline { page_size } => {
            let page_size = page_size.unwrap_or(engine.config().sync.list_page_size);
            let (report, job) = engine
                .actions()
                .sync_list_and_enqueue_bulk_details(page_size)
                .await?;
            println!(
                "fetched {} subscribers; bulk detail job {}{}",
                report.fetched,
                job.id,
                if job.deduplicated { " (already queued)" } else { "" }
            );
        }
        Command::Worker => run_worker(&engine).await?,
        Command::Status => print_status(&engine).await?,
    }

    engine.database().close().await;
    Ok(())
}

async fn run_worker(engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
    let (worker, handle) = engine.job_worker();
    let task = tokio::spawn(worker.run());

    shutdown_signal().await;
    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "Worker already stopped");
    }
    task.await?;
    Ok(())
}

async fn print_status(engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
    let jobs = engine.database().jobs();
    for status in [JobStatus::Queued, JobStatus::Running, JobStatus::Done, JobStatus::Failed] {
        println!("jobs {:<8} {}", status.to_string(), jobs.count_by_status(status).await?);
    }

    match engine.database().sync_runs().latest(BULK_DETAILS_RUN).await? {
        Some(run) => println!(
            "last bulk run {} ({:?}): {}/{} processed, {} failed",
            run.id, run.status, run.processed, run.total, run.failed
        ),
        None => println!("no bulk run recorded"),
    }
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(?e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping worker");
}
