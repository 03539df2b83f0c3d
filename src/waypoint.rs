//! Waypoints and the validated set they are collected into
//!
//! A [`WaypointSet`] is a local builder: every waypoint is checked against the
//! fixed axis count as it is added, so a finalized [`Waypoints`] can be handed
//! to the dispatcher without further checks.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Ordered, unique axis names. Index `i` of every waypoint vector refers to axis `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct AxisOrdering(Vec<String>);

impl AxisOrdering {
    pub fn new<I, S>(names: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(ValidationError::EmptyAxisOrdering);
        }

        let mut seen = HashSet::with_capacity(names.len());
        for (index, name) in names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(ValidationError::EmptyAxisName(index));
            }
            if !seen.insert(name.as_str()) {
                return Err(ValidationError::DuplicateAxis(name.clone()));
            }
        }

        Ok(Self(names))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }
}

impl TryFrom<Vec<String>> for AxisOrdering {
    type Error = ValidationError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(names)
    }
}

impl From<AxisOrdering> for Vec<String> {
    fn from(ordering: AxisOrdering) -> Self {
        ordering.0
    }
}

/// One target configuration of the trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub positions: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocities: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerations: Option<Vec<f64>>,
    /// Offset from the trajectory start at which this point should be reached
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_secs")]
    pub time_from_start: Option<Duration>,
}

impl Waypoint {
    pub fn new(positions: impl Into<Vec<f64>>) -> Self {
        Self {
            positions: positions.into(),
            velocities: None,
            accelerations: None,
            time_from_start: None,
        }
    }

    pub fn with_velocities(mut self, velocities: impl Into<Vec<f64>>) -> Self {
        self.velocities = Some(velocities.into());
        self
    }

    pub fn with_accelerations(mut self, accelerations: impl Into<Vec<f64>>) -> Self {
        self.accelerations = Some(accelerations.into());
        self
    }

    pub fn with_time_from_start(mut self, time_from_start: Duration) -> Self {
        self.time_from_start = Some(time_from_start);
        self
    }

    /// Check vector lengths against `axis_count`. `index` only labels the error.
    fn validate(&self, index: usize, axis_count: usize) -> Result<(), ValidationError> {
        if self.positions.len() != axis_count {
            return Err(ValidationError::PositionsLength {
                index,
                expected: axis_count,
                actual: self.positions.len(),
            });
        }
        if let Some(velocities) = &self.velocities {
            if velocities.len() != axis_count {
                return Err(ValidationError::VelocitiesLength {
                    index,
                    expected: axis_count,
                    actual: velocities.len(),
                });
            }
        }
        if let Some(accelerations) = &self.accelerations {
            if accelerations.len() != axis_count {
                return Err(ValidationError::AccelerationsLength {
                    index,
                    expected: axis_count,
                    actual: accelerations.len(),
                });
            }
        }
        check_finite(index, "positions", &self.positions)?;
        if let Some(velocities) = &self.velocities {
            check_finite(index, "velocities", velocities)?;
        }
        if let Some(accelerations) = &self.accelerations {
            check_finite(index, "accelerations", accelerations)?;
        }
        Ok(())
    }
}

/// NaN and infinities have no JSON representation and no physical meaning
fn check_finite(index: usize, field: &'static str, values: &[f64]) -> Result<(), ValidationError> {
    match values.iter().position(|value| !value.is_finite()) {
        Some(axis) => Err(ValidationError::NonFinite { index, field, axis }),
        None => Ok(()),
    }
}

/// Builder collecting waypoints in execution order.
#[derive(Debug, Clone)]
pub struct WaypointSet {
    axis_count: usize,
    points: Vec<Waypoint>,
    last_time: Option<Duration>,
}

impl WaypointSet {
    pub fn new(axis_count: usize) -> Self {
        Self {
            axis_count,
            points: Vec::new(),
            last_time: None,
        }
    }

    pub fn for_axes(axes: &AxisOrdering) -> Self {
        Self::new(axes.len())
    }

    /// Build a set from an iterator, failing on the first invalid waypoint.
    pub fn from_points(
        axis_count: usize,
        points: impl IntoIterator<Item = Waypoint>,
    ) -> Result<Self, ValidationError> {
        let mut set = Self::new(axis_count);
        for point in points {
            set.add(point)?;
        }
        Ok(set)
    }

    /// Append a waypoint. The set is left unchanged when validation fails.
    pub fn add(&mut self, waypoint: Waypoint) -> Result<(), ValidationError> {
        let index = self.points.len();
        waypoint.validate(index, self.axis_count)?;

        if let Some(current) = waypoint.time_from_start {
            if let Some(previous) = self.last_time {
                if current <= previous {
                    return Err(ValidationError::TimeNotIncreasing { index, previous, current });
                }
            }
            self.last_time = Some(current);
        }

        self.points.push(waypoint);
        Ok(())
    }

    pub fn axis_count(&self) -> usize {
        self.axis_count
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn finalize(self) -> Result<Waypoints, ValidationError> {
        if self.points.is_empty() {
            return Err(ValidationError::EmptyTrajectory);
        }
        Ok(Waypoints {
            axis_count: self.axis_count,
            points: self.points,
        })
    }
}

/// Finalized, non-empty waypoint sequence. Read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct Waypoints {
    axis_count: usize,
    points: Vec<Waypoint>,
}

impl Waypoints {
    pub fn axis_count(&self) -> usize {
        self.axis_count
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn as_slice(&self) -> &[Waypoint] {
        &self.points
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Waypoint> {
        self.points.iter()
    }
}

impl Serialize for Waypoints {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.points.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Waypoints {
    /// Incoming waypoint lists go back through the builder so the set invariants hold.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let points = Vec::<Waypoint>::deserialize(deserializer)?;
        let axis_count = points.first().map(|p| p.positions.len()).unwrap_or(0);
        WaypointSet::from_points(axis_count, points)
            .and_then(WaypointSet::finalize)
            .map_err(serde::de::Error::custom)
    }
}

/// `Option<Duration>` as fractional seconds
mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(duration) => serializer.serialize_f64(duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<f64>::deserialize(deserializer)? {
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
