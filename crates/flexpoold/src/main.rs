//! flexpoold — the flexpool daemon.
//!
//! Single binary that assembles the supervisor stack:
//! - Record store (redb)
//! - Worker pool supervisor (load balancing, telemetry, auto-scaling)
//!
//! # Usage
//!
//! ```text
//! flexpoold run --data-dir /var/lib/flexpool --min-workers 2 --max-workers 8
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use flexpool_balance::Strategy;
use flexpool_supervisor::{Supervisor, SupervisorConfig};

#[derive(Parser)]
#[command(name = "flexpoold", about = "flexpool daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the supervisor until interrupted.
    Run {
        /// Optional TOML config file; flags below override it.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/flexpool")]
        data_dir: PathBuf,

        /// Floor for the running pool.
        #[arg(long)]
        min_workers: Option<u32>,

        /// Hard cap on the pool.
        #[arg(long)]
        max_workers: Option<u32>,

        /// Load balance strategy: round-robin, least-connections, random.
        #[arg(long)]
        strategy: Option<Strategy>,

        /// Scaling check interval in seconds.
        #[arg(long)]
        scale_check_interval: Option<u64>,

        /// Disable the auto-scaling control loop.
        #[arg(long)]
        no_autoscaling: bool,

        /// Log filter, e.g. "info" or "debug".
        #[arg(long)]
        log_level: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            data_dir,
            min_workers,
            max_workers,
            strategy,
            scale_check_interval,
            no_autoscaling,
            log_level,
        } => {
            let mut config = match config {
                Some(path) => SupervisorConfig::from_file(&path)?,
                None => SupervisorConfig::default(),
            };
            if let Some(min) = min_workers {
                config.autoscale.min_workers = min;
            }
            if let Some(max) = max_workers {
                config.autoscale.max_workers = max;
            }
            if let Some(strategy) = strategy {
                config.strategy = strategy;
            }
            if let Some(secs) = scale_check_interval {
                config.autoscale.check_interval = Duration::from_secs(secs);
            }
            if no_autoscaling {
                config.autoscale.enabled = false;
            }
            if let Some(level) = log_level {
                config.log_level = level;
            }

            init_tracing(&config.log_level);
            run(config, data_dir).await
        }
    }
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.parse().expect("valid log filter")),
        )
        .init();
}

async fn run(config: SupervisorConfig, data_dir: PathBuf) -> anyhow::Result<()> {
    info!("flexpool daemon starting");

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("flexpool.redb");

    let store = flexpool_state::RecordStore::open(&db_path)?;
    info!(path = ?db_path, "record store opened");

    let handle = Supervisor::start(config, store)?;
    info!("supervisor started");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    handle.shutdown().await?;
    info!("flexpool daemon stopped");
    Ok(())
}
