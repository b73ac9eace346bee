use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use geosource_scheduler::{
    backends::{FileSourceStore, HttpJobBackend, JobBackend, MemoryJobBackend, SourceStore},
    config::Config,
    execution::{ExecutionGuard, Submission},
    job_scheduling::{HeapScheduler, RefreshApi},
    models::SourceId,
};

#[derive(Parser)]
#[command(name = "geosource-scheduler")]
#[command(version)]
#[command(about = "Schedules periodic refresh jobs for geographic data sources")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Record jobs in memory instead of sending them to the job backend
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until interrupted
    Run,
    /// Submit a data refresh for every source
    ResyncAll {
        /// Submit even when a job is still outstanding
        #[arg(long)]
        force: bool,
    },
    /// Refresh one source now
    Refresh { source_id: String },
    /// Print the job status of one source
    Status { source_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("geosource_scheduler={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting geosource-scheduler v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load_from_file(&cli.config)?;
    info!(
        "Using sources from {} and job backend {}",
        config.store.sources_file.display(),
        if cli.dry_run {
            "in-memory (dry run)"
        } else {
            config.backend.base_url.as_str()
        }
    );

    let store: Arc<dyn SourceStore> = Arc::new(FileSourceStore::new(&config.store.sources_file));
    let backend: Arc<dyn JobBackend> = if cli.dry_run {
        Arc::new(MemoryJobBackend::new())
    } else {
        Arc::new(HttpJobBackend::from_config(&config.backend)?)
    };
    let guard = Arc::new(ExecutionGuard::new(
        store.clone(),
        backend,
        &config.scheduler,
    ));

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let scheduler = HeapScheduler::new(store, guard, config.scheduler.clone());
            let cancellation_token = CancellationToken::new();

            let shutdown = cancellation_token.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("Received Ctrl-C, stopping"),
                    Err(e) => warn!("Could not listen for Ctrl-C: {}", e),
                }
                shutdown.cancel();
            });

            scheduler.run(cancellation_token).await;
            Ok(())
        }
        Command::ResyncAll { force } => {
            let summary = RefreshApi::new(guard).refresh_all(force, Utc::now()).await?;
            println!(
                "Submitted {}, already running {}, failed {} of {} sources",
                summary.submitted.len(),
                summary.rejected.len(),
                summary.failed.len(),
                summary.total()
            );
            if summary.failed.is_empty() {
                Ok(())
            } else {
                Err(anyhow::anyhow!(
                    "{} sources could not be submitted",
                    summary.failed.len()
                ))
            }
        }
        Command::Refresh { source_id } => {
            let id = SourceId::from(source_id);
            match RefreshApi::new(guard).force_refresh(&id, Utc::now()).await? {
                Submission::Submitted(job) => println!("Submitted job {job} for source {id}"),
                Submission::Rejected(reason) => println!("Not submitted: {reason}"),
            }
            Ok(())
        }
        Command::Status { source_id } => {
            let id = SourceId::from(source_id);
            let report = RefreshApi::new(guard).source_status(&id, Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    };

    if let Err(e) = &result {
        error!("Command failed: {}", e);
    }
    result
}
