//! Configuration and trajectory file loading

use crate::dispatcher::TrajectoryDispatcher;
use crate::error::{Result, TrajError, ValidationError};
use crate::goal::{StartTime, TrajectoryGoal};
use crate::waypoint::{Waypoint, WaypointSet};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/default_config.yaml";
pub const DEFAULT_FRAME_ID: &str = "base_link";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DaemonConfig {
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    pub simulator: Option<SimulatorConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorMode {
    #[default]
    Tcp,
    Simulated,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub mode: ExecutorMode,
    pub address: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            mode: ExecutorMode::Tcp,
            address: "127.0.0.1:7450".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// Seconds per connection attempt
    pub timeout: f64,
    pub retry_attempts: u32,
    /// Seconds between attempts
    pub retry_delay: f64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout: 5.0,
            retry_attempts: 3,
            retry_delay: 1.0,
        }
    }
}

impl ConnectionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout).unwrap_or(Duration::from_secs(5))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.retry_delay).unwrap_or(Duration::from_secs(1))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DispatchConfig {
    pub timeout_seconds: Option<f64>,
    pub frame_id: Option<String>,
    pub show_feedback: Option<bool>,
}

impl DispatchConfig {
    /// Dispatch timeout; `None` waits indefinitely
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// Frame id with default fallback
    pub fn frame_id(&self) -> &str {
        self.frame_id.as_deref().unwrap_or(DEFAULT_FRAME_ID)
    }

    pub fn show_feedback(&self) -> bool {
        self.show_feedback.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SimulatorConfig {
    pub point_interval_ms: Option<u64>,
    pub reject_reason: Option<String>,
    pub abort_at_waypoint: Option<usize>,
}

impl SimulatorConfig {
    /// Point interval with default fallback
    pub fn point_interval_ms(&self) -> u64 {
        self.point_interval_ms.unwrap_or(500)
    }
}

impl DaemonConfig {
    pub fn load_from_path(config_path: &str) -> Result<Self> {
        let contents = fs::read_to_string(config_path)
            .map_err(|e| TrajError::Config(format!("Failed to read {}: {}", config_path, e)))?;
        Self::load_from_str(&contents)
    }

    pub fn load_from_str(contents: &str) -> Result<Self> {
        let config: DaemonConfig = serde_yaml::from_str(contents)?;
        Ok(config)
    }

    /// Simulator configuration with defaults
    pub fn simulator(&self) -> SimulatorConfig {
        self.simulator.clone().unwrap_or_default()
    }
}

/// A trajectory as written in a YAML file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrajectoryFile {
    pub axes: Vec<String>,
    /// Overrides the configured frame id
    pub frame_id: Option<String>,
    /// Start this many seconds after the goal is built instead of immediately
    pub start_delay: Option<f64>,
    pub points: Vec<Waypoint>,
}

impl TrajectoryFile {
    pub fn load_from_path(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| TrajError::Config(format!("Failed to read {}: {}", path, e)))?;
        Self::load_from_str(&contents)
    }

    pub fn load_from_str(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Validate every point and build the goal
    pub fn to_goal(
        &self,
        default_frame_id: &str,
    ) -> std::result::Result<TrajectoryGoal, ValidationError> {
        let waypoints = WaypointSet::from_points(self.axes.len(), self.points.iter().cloned())?;
        let start_time = match self.start_delay {
            Some(secs) if !secs.is_finite() || secs < 0.0 => {
                return Err(ValidationError::StartDelayOutOfRange(secs));
            }
            Some(secs) if secs > 0.0 => {
                let stamp = chrono::Duration::try_milliseconds((secs * 1000.0).round() as i64)
                    .and_then(|delay| chrono::Utc::now().checked_add_signed(delay))
                    .ok_or(ValidationError::StartDelayOutOfRange(secs))?;
                StartTime::At(stamp)
            }
            _ => StartTime::Immediate,
        };
        TrajectoryDispatcher::build_goal(
            self.axes.iter().cloned(),
            waypoints,
            self.frame_id.as_deref().unwrap_or(default_frame_id),
            start_time,
        )
    }
}
