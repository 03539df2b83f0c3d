//! JSON Output for Dispatch Events
//!
//! Structured JSON lines describing goal status transitions, executor
//! feedback, outcomes and errors, for consumption by external tools.

use crate::channel::{GoalId, TrajectoryFeedback};
use crate::state::{DispatchState, ExecutionOutcome};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current timestamp as f64 seconds since UNIX epoch with consistent precision
pub fn current_timestamp() -> f64 {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();

    // Round to 6 decimal places for consistent formatting
    (timestamp * 1_000_000.0).round() / 1_000_000.0
}

/// Goal state transition event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalStatusEvent {
    pub timestamp: f64,
    /// Event type for JSON parsing
    #[serde(rename = "type")]
    pub event_type: String,
    pub goal_id: GoalId,
    pub state: DispatchState,
    /// Human-readable message
    pub message: String,
}

/// Executor progress for an active goal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackOutputEvent {
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub goal_id: GoalId,
    pub feedback: TrajectoryFeedback,
}

/// Final result of a dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeEvent {
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub goal_id: GoalId,
    #[serde(flatten)]
    pub outcome: ExecutionOutcome,
    /// Wall time from send to terminal state
    pub elapsed_ms: u64,
}

/// Error event (validation, transport)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_id: Option<GoalId>,
    pub error: String,
}

impl GoalStatusEvent {
    pub fn new(goal_id: GoalId, state: DispatchState, message: &str) -> Self {
        Self {
            timestamp: current_timestamp(),
            event_type: "goal_status".to_string(),
            goal_id,
            state,
            message: message.to_string(),
        }
    }
}

impl FeedbackOutputEvent {
    pub fn new(goal_id: GoalId, feedback: TrajectoryFeedback) -> Self {
        Self {
            timestamp: current_timestamp(),
            event_type: "feedback".to_string(),
            goal_id,
            feedback,
        }
    }
}

impl OutcomeEvent {
    pub fn new(goal_id: GoalId, outcome: ExecutionOutcome, elapsed_ms: u64) -> Self {
        Self {
            timestamp: current_timestamp(),
            event_type: "outcome".to_string(),
            goal_id,
            outcome,
            elapsed_ms,
        }
    }
}

impl ErrorEvent {
    pub fn new(error: &str, goal_id: Option<GoalId>) -> Self {
        Self {
            timestamp: current_timestamp(),
            event_type: "error".to_string(),
            goal_id,
            error: error.to_string(),
        }
    }
}

/// Output a JSON event to stdout
pub fn output_event<T: Serialize>(event: &T) {
    if let Ok(json) = serde_json::to_string(event) {
        println!("{}", json);
    }
}

/// Convenience functions for outputting specific event types
pub mod output {
    use super::*;

    pub fn error(error_msg: &str, goal_id: Option<GoalId>) {
        output_event(&ErrorEvent::new(error_msg, goal_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_event_flattens_reason() {
        let event = OutcomeEvent::new(
            GoalId::new(),
            ExecutionOutcome::Rejected(Some("bad frame".to_string())),
            12,
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "outcome");
        assert_eq!(json["outcome"], "rejected");
        assert_eq!(json["reason"], "bad frame");
        assert_eq!(json["elapsed_ms"], 12);
    }

    #[test]
    fn test_status_event_state_name() {
        let event = GoalStatusEvent::new(GoalId::new(), DispatchState::TimedOut, "deadline");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["state"], "timed_out");
    }
}
