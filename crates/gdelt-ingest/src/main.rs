//! GDELT Ingest - incremental feed loader

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gdelt_common::logging::{init_logging, LogConfig, LogLevel};
use gdelt_ingest::config::IngestConfig;
use gdelt_ingest::orchestrator::Orchestrator;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "gdelt-ingest")]
#[command(author, version, about = "Incremental GDELT 2.0 feed ingestion into PostgreSQL")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Staging directory for downloaded files
    #[arg(long, global = true, env = "GDELT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Rows per insert batch
    #[arg(long, global = true, env = "GDELT_CHUNK_SIZE")]
    chunk_size: Option<usize>,

    /// Concurrent file tasks (defaults to the number of CPUs)
    #[arg(long, global = true, env = "GDELT_WORKERS")]
    workers: Option<usize>,

    /// Master file list URL
    #[arg(long, global = true, env = "GDELT_MANIFEST_URL")]
    manifest_url: Option<String>,

    /// PostgreSQL connection URL (overrides DB_HOST, DB_PORT, ...)
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one ingestion pass
    Run {
        /// Print the final summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the files the next run would ingest, without downloading them
    Plan,

    /// Print the current watermark
    Watermark,
}

impl Cli {
    fn apply(&self, config: &mut IngestConfig) {
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(url) = &self.manifest_url {
            config.manifest_url = url.clone();
        }
        if let Some(url) = &self.database_url {
            config.database.url = Some(url.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("gdelt-ingest")
        .filter_directives("sqlx=warn")
        .build()
        .merge_env()?;
    let _log_guard = init_logging(&log_config)?;

    let mut config = IngestConfig::from_env().context("Failed to load configuration")?;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let orchestrator = Orchestrator::from_config(&config)
        .await
        .context("Failed to connect to the database")?;

    match cli.command {
        Command::Run { json } => {
            let shutdown = CancellationToken::new();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Shutdown requested, finishing in-flight batches");
                    signal.cancel();
                }
            });

            info!(
                workers = config.workers,
                chunk_size = config.chunk_size,
                data_dir = %config.data_dir.display(),
                "Starting ingestion run"
            );
            let summary = orchestrator.run(shutdown).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{}", summary);
            }
        },
        Command::Plan => {
            let planned = orchestrator.plan().await;
            orchestrator.close().await;
            let (watermark, tasks) = planned?;

            println!("watermark: {}", watermark);
            for task in &tasks {
                println!("{}\t{}", task.record_type, task.entry.url);
            }
            println!("{} files selected", tasks.len());
        },
        Command::Watermark => {
            let watermark = orchestrator.watermark().await;
            orchestrator.close().await;
            println!("{}", watermark);
        },
    }

    Ok(())
}
