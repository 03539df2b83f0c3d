//! trajd - Multi-waypoint trajectory dispatch for articulated arms
//!
//! Builds validated joint-space trajectories and runs them on a remote
//! trajectory executor through an asynchronous goal/feedback/result channel,
//! following each goal to a terminal outcome.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use trajd::{SimulatedExecutor, StartTime, TrajectoryDispatcher, Waypoint, WaypointSet};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut waypoints = WaypointSet::new(3);
//!     waypoints.add(Waypoint::new([0.2, 0.0, 3.4]))?;
//!     waypoints.add(Waypoint::new([0.6, 0.3, 0.0]).with_velocities([0.1, 0.1, 0.1]))?;
//!
//!     let goal = TrajectoryDispatcher::build_goal(
//!         ["joint_lift", "wrist_extension", "joint_wrist_yaw"],
//!         waypoints,
//!         "base_link",
//!         StartTime::Immediate,
//!     )?;
//!
//!     let dispatcher = TrajectoryDispatcher::new(SimulatedExecutor::default());
//!     let outcome = dispatcher.dispatch(&goal, Some(Duration::from_secs(10))).await?;
//!     println!("Trajectory finished: {}", outcome);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **WaypointSet**: validated builder for the ordered waypoint sequence
//! - **TrajectoryGoal**: immutable request (axes, waypoints, frame, start time)
//! - **TrajectoryDispatcher**: sends a goal and drives the dispatch state machine
//! - **ActionChannel**: transport trait; `TcpActionChannel` and `SimulatedExecutor` implement it
//! - **DispatchTelemetry**: transport-agnostic status/feedback publishing

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor_server;
pub mod goal;
pub mod json_output;
pub mod sim;
pub mod state;
pub mod tcp_channel;
pub mod telemetry;
pub mod waypoint;
pub mod wire;

pub use channel::{
    ActionChannel, FeedbackEvent, FeedbackStream, GoalId, ResultEvent, TrajectoryFeedback,
};
pub use config::{DaemonConfig, ExecutorMode, TrajectoryFile};
pub use dispatcher::{ActiveGoal, GoalHandle, PreemptHandle, TrajectoryDispatcher};
pub use error::{ChannelError, Result, TrajError, ValidationError};
pub use goal::{StartTime, TrajectoryGoal};
pub use sim::{SimBehavior, SimulatedExecutor};
pub use state::{DispatchState, ExecutionOutcome};
pub use tcp_channel::TcpActionChannel;
pub use telemetry::{ConsoleTelemetry, DispatchTelemetry, NoOpTelemetry};
pub use waypoint::{AxisOrdering, Waypoint, WaypointSet, Waypoints};
