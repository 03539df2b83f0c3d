//! trajd_sim - Simulated trajectory executor
//!
//! Serves the trajd wire protocol on a TCP port and plays every received goal
//! back against the simulator's time model. Useful for exercising the
//! dispatcher end to end without hardware.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use trajd::config::SimulatorConfig;
use trajd::executor_server;
use trajd::{SimBehavior, SimulatedExecutor};

#[derive(Parser)]
#[command(name = "trajd_sim")]
#[command(about = "Simulated trajectory executor speaking the trajd TCP protocol")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:7450")]
    bind: String,

    /// Milliseconds spent moving to each waypoint
    #[arg(long, default_value = "500")]
    point_interval_ms: u64,

    /// Reject every goal with this reason
    #[arg(long)]
    reject: Option<String>,

    /// Abort goals on reaching this waypoint index
    #[arg(long)]
    abort_at: Option<usize>,

    /// Show debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "trajd=debug,info" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let behavior = SimBehavior::from(&SimulatorConfig {
        point_interval_ms: Some(args.point_interval_ms),
        reject_reason: args.reject.clone(),
        abort_at_waypoint: args.abort_at,
    });
    info!("Simulated executor: {:?}", behavior);

    let listener = TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("Failed to bind {}", args.bind))?;

    tokio::select! {
        result = executor_server::serve(listener, SimulatedExecutor::new(behavior)) => {
            result.context("Executor server stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down simulated executor");
        }
    }
    Ok(())
}
