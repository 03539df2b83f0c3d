//! The wire-level trajectory request

use crate::error::ValidationError;
use crate::waypoint::{AxisOrdering, WaypointSet, Waypoints};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// When the executor should consider the trajectory to begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "stamp")]
pub enum StartTime {
    /// Zero stamp: start as soon as the goal is accepted
    #[default]
    Immediate,
    At(DateTime<Utc>),
}

impl StartTime {
    pub fn is_immediate(&self) -> bool {
        matches!(self, StartTime::Immediate)
    }
}

/// An immutable, validated trajectory goal.
///
/// Fields are private so a goal can only come out of [`TrajectoryGoal::new`]
/// (or deserialization, which goes through it).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrajectoryGoal {
    axes: AxisOrdering,
    points: Waypoints,
    frame_id: String,
    start_time: StartTime,
}

impl TrajectoryGoal {
    pub fn new(
        axes: AxisOrdering,
        waypoints: WaypointSet,
        frame_id: impl Into<String>,
        start_time: StartTime,
    ) -> Result<Self, ValidationError> {
        if waypoints.axis_count() != axes.len() {
            return Err(ValidationError::AxisCountMismatch {
                ordering_axes: axes.len(),
                waypoint_axes: waypoints.axis_count(),
            });
        }
        let points = waypoints.finalize()?;

        Ok(Self {
            axes,
            points,
            frame_id: frame_id.into(),
            start_time,
        })
    }

    pub fn axes(&self) -> &AxisOrdering {
        &self.axes
    }

    pub fn waypoints(&self) -> &Waypoints {
        &self.points
    }

    pub fn frame_id(&self) -> &str {
        &self.frame_id
    }

    pub fn start_time(&self) -> StartTime {
        self.start_time
    }
}

impl<'de> Deserialize<'de> for TrajectoryGoal {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            axes: AxisOrdering,
            points: Waypoints,
            #[serde(default)]
            frame_id: String,
            #[serde(default)]
            start_time: StartTime,
        }

        let raw = Raw::deserialize(deserializer)?;
        let set = WaypointSet::from_points(raw.axes.len(), raw.points.iter().cloned())
            .map_err(serde::de::Error::custom)?;
        TrajectoryGoal::new(raw.axes, set, raw.frame_id, raw.start_time)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waypoint::Waypoint;

    fn axes() -> AxisOrdering {
        AxisOrdering::new(["joint_lift", "wrist_extension", "joint_wrist_yaw"]).unwrap()
    }

    #[test]
    fn test_axis_count_mismatch() {
        let mut set = WaypointSet::new(2);
        set.add(Waypoint::new([0.1, 0.2])).unwrap();
        let err = TrajectoryGoal::new(axes(), set, "base_link", StartTime::Immediate).unwrap_err();
        assert_eq!(
            err,
            ValidationError::AxisCountMismatch { ordering_axes: 3, waypoint_axes: 2 }
        );
    }

    #[test]
    fn test_goal_json_roundtrip_keeps_points() {
        let mut set = WaypointSet::for_axes(&axes());
        set.add(Waypoint::new([0.2, 0.0, 3.4])).unwrap();
        set.add(Waypoint::new([0.6, 0.3, 0.0]).with_velocities([0.1, 0.1, 0.1])).unwrap();
        let goal = TrajectoryGoal::new(axes(), set, "base_link", StartTime::Immediate).unwrap();

        let json = serde_json::to_string(&goal).unwrap();
        let parsed: TrajectoryGoal = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, goal);
    }

    #[test]
    fn test_deserialize_rejects_short_point() {
        let json = r#"{
            "axes": ["a", "b"],
            "points": [{"positions": [0.0, 1.0]}, {"positions": [0.0]}],
            "frame_id": "base_link"
        }"#;
        let err = serde_json::from_str::<TrajectoryGoal>(json).unwrap_err();
        assert!(err.to_string().contains("expected 2 positions"));
    }

    #[test]
    fn test_start_time_json_shape() {
        assert!(StartTime::default().is_immediate());
        let json = serde_json::to_value(StartTime::Immediate).unwrap();
        assert_eq!(json["kind"], "immediate");
    }
}
