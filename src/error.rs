//! Error types for trajectory construction and dispatch

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrajError>;

/// Malformed waypoints or axis mismatches, detected before anything is sent.
///
/// These are caller bugs and are never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("waypoint {index}: expected {expected} positions, got {actual}")]
    PositionsLength { index: usize, expected: usize, actual: usize },

    #[error("waypoint {index}: expected {expected} velocities, got {actual}")]
    VelocitiesLength { index: usize, expected: usize, actual: usize },

    #[error("waypoint {index}: expected {expected} accelerations, got {actual}")]
    AccelerationsLength { index: usize, expected: usize, actual: usize },

    #[error("waypoint {index}: time_from_start must increase ({current:?} after {previous:?})")]
    TimeNotIncreasing {
        index: usize,
        previous: std::time::Duration,
        current: std::time::Duration,
    },

    #[error("waypoint {index}: {field}[{axis}] is not a finite number")]
    NonFinite { index: usize, field: &'static str, axis: usize },

    #[error("start delay of {0}s is not representable")]
    StartDelayOutOfRange(f64),

    #[error("trajectory contains no waypoints")]
    EmptyTrajectory,

    #[error("axis ordering is empty")]
    EmptyAxisOrdering,

    #[error("axis {0} has an empty name")]
    EmptyAxisName(usize),

    #[error("duplicate axis name: {0}")]
    DuplicateAxis(String),

    #[error("waypoints were built for {waypoint_axes} axes but the ordering names {ordering_axes}")]
    AxisCountMismatch { ordering_axes: usize, waypoint_axes: usize },
}

/// Transport failures between the dispatcher and the remote executor.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("failed to connect to executor at {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("executor connection lost")]
    Disconnected,

    #[error("failed to send to executor: {0}")]
    Send(String),

    #[error("unknown goal: {0}")]
    UnknownGoal(String),

    #[error("malformed executor message: {0}")]
    Protocol(String),

    #[error("event stream for goal {0} closed before the goal was accepted")]
    StreamClosed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum TrajError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
