//! trajd - Trajectory dispatch CLI
//!
//! Loads a trajectory file, sends it to the configured executor and follows it
//! to a terminal outcome. Status, feedback and the outcome are printed to
//! stdout as JSON lines; logs go to stderr.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use trajd::config::DEFAULT_CONFIG_PATH;
use trajd::json_output::output;
use trajd::{
    ConsoleTelemetry, DaemonConfig, ExecutorMode, SimBehavior, SimulatedExecutor,
    TcpActionChannel, TrajectoryDispatcher, TrajectoryFile, TrajectoryGoal,
};

#[derive(Parser)]
#[command(name = "trajd")]
#[command(about = "Dispatch multi-waypoint joint trajectories to a trajectory executor")]
#[command(version)]
struct Args {
    /// Path to the daemon configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Pretty-print JSON events
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a trajectory and wait for its outcome
    Run {
        /// Trajectory YAML file
        trajectory: String,

        /// Seconds to wait for completion (overrides the config)
        #[arg(short, long)]
        timeout: Option<f64>,

        /// Run against the in-process simulated executor
        #[arg(long)]
        simulate: bool,
    },
    /// Build and validate a trajectory without sending it
    Validate {
        /// Trajectory YAML file
        trajectory: String,
    },
}

impl Args {
    fn get_config_path(&self) -> String {
        self.config
            .clone()
            .or_else(|| std::env::var("DEFAULT_CONFIG_PATH").ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "trajd=debug,info" } else { "trajd=info,warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = args.get_config_path();
    let config = load_config(&config_path)?;

    match &args.command {
        Commands::Validate { trajectory } => {
            let goal = load_goal(trajectory, &config)?;
            println!(
                "✓ {}: {} waypoints over [{}] in frame '{}'",
                trajectory,
                goal.waypoints().len(),
                goal.axes().names().join(", "),
                goal.frame_id()
            );
            Ok(())
        }
        Commands::Run { trajectory, timeout, simulate } => {
            let goal = match load_goal(trajectory, &config) {
                Ok(goal) => goal,
                Err(e) => {
                    output::error(&format!("{:#}", e), None);
                    return Err(e);
                }
            };
            let timeout = match timeout {
                Some(secs) => Some(
                    Duration::try_from_secs_f64(*secs)
                        .with_context(|| format!("Invalid timeout: {}", secs))?,
                ),
                None => config.dispatch.timeout(),
            };
            run(&config, &goal, timeout, *simulate, args.pretty).await
        }
    }
}

/// A missing config file falls back to defaults; a malformed one is an error
fn load_config(config_path: &str) -> Result<DaemonConfig> {
    if !std::path::Path::new(config_path).exists() {
        warn!("Config {} not found, using defaults", config_path);
        return Ok(DaemonConfig::default());
    }
    info!("Using config: {}", config_path);
    DaemonConfig::load_from_path(config_path)
        .with_context(|| format!("Failed to load config {}", config_path))
}

fn load_goal(path: &str, config: &DaemonConfig) -> Result<TrajectoryGoal> {
    let file = TrajectoryFile::load_from_path(path)
        .with_context(|| format!("Failed to load trajectory {}", path))?;
    file.to_goal(config.dispatch.frame_id())
        .with_context(|| format!("Invalid trajectory {}", path))
}

async fn run(
    config: &DaemonConfig,
    goal: &TrajectoryGoal,
    timeout: Option<Duration>,
    simulate: bool,
    pretty: bool,
) -> Result<()> {
    let dispatcher = if simulate || config.executor.mode == ExecutorMode::Simulated {
        let behavior = SimBehavior::from(&config.simulator());
        info!(
            "Using simulated executor ({}ms per waypoint)",
            behavior.point_interval.as_millis()
        );
        TrajectoryDispatcher::new(SimulatedExecutor::new(behavior))
    } else {
        let channel = TcpActionChannel::connect(&config.executor.address, &config.connection)
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to executor at {}. Make sure the executor is running",
                    config.executor.address
                )
            })?;
        TrajectoryDispatcher::new(channel)
    };

    let mut telemetry = if pretty { ConsoleTelemetry::pretty() } else { ConsoleTelemetry::new() };
    if !config.dispatch.show_feedback() {
        telemetry = telemetry.without_feedback();
    }
    let dispatcher = dispatcher.with_telemetry(Arc::new(telemetry));

    let preempt = dispatcher.preempt_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if preempt.preempt() {
                warn!("Ctrl+C received, preempting running goal");
            } else {
                info!("Ctrl+C received with no goal running");
            }
        }
    });

    match timeout {
        Some(timeout) => info!("Dispatching with a {:.1}s timeout", timeout.as_secs_f64()),
        None => info!("Dispatching without a timeout"),
    }

    let outcome = match dispatcher.dispatch(goal, timeout).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Dispatch failed: {}", e);
            output::error(&e.to_string(), None);
            return Err(e.into());
        }
    };

    if !outcome.is_success() {
        bail!("Trajectory did not complete: {}", outcome);
    }
    Ok(())
}
