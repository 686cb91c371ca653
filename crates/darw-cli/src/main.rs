use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "darw-cli")]
#[command(about = "dbGaP authorized requestor watch")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the monitor pipeline once and exit.
    Run,
    /// Keep running the monitor on the configured cron schedule.
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let summary = darw_sync::run_monitor_once_from_env().await?;
            println!(
                "monitor run complete: run_id={} study={} recent_requestors={} sent={}",
                summary.run_id, summary.study_id, summary.record_count, summary.sent
            );
        }
        Commands::Watch => {
            let config = darw_sync::MonitorConfig::from_env()?;
            let pipeline = Arc::new(darw_sync::MonitorPipeline::new(config)?);
            match pipeline.maybe_build_scheduler().await? {
                Some(mut sched) => {
                    sched.start().await.context("starting scheduler")?;
                    tracing::info!("scheduler started; press ctrl-c to stop");
                    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
                }
                None => {
                    eprintln!(
                        "scheduler disabled; set DARW_SCHEDULER_ENABLED=1 to enable watch mode"
                    );
                }
            }
        }
    }

    Ok(())
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
