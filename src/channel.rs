//! Action channel abstraction
//!
//! The transport between the dispatcher and a remote trajectory executor:
//! send a goal, watch its event stream, request cancellation and await the
//! terminal result. Implementations live in [`crate::tcp_channel`] and
//! [`crate::sim`].

use crate::error::ChannelError;
use crate::goal::TrajectoryGoal;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of one remote execution instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GoalId(Uuid);

impl GoalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GoalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GoalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Progress report from the executor while a goal is active
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryFeedback {
    /// Index of the waypoint the executor is currently heading to
    pub waypoint_index: usize,
    pub desired: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Vec<f64>>,
}

/// Events delivered on a goal's feedback stream, in executor order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum FeedbackEvent {
    Accepted,
    Rejected { reason: Option<String> },
    Progress(TrajectoryFeedback),
}

/// Terminal result reported by the executor for an accepted goal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ResultEvent {
    Succeeded,
    Aborted { reason: Option<String> },
    /// The goal was stopped in response to a cancel request
    Canceled { reason: Option<String> },
}

pub type FeedbackStream = BoxStream<'static, FeedbackEvent>;

/// Request/feedback/result transport to a trajectory executor.
///
/// `subscribe_feedback` and `await_result` may each be called once per goal.
/// A stream that ends before a terminal event means the transport is gone.
#[async_trait]
pub trait ActionChannel: Send + Sync {
    /// Submit a goal. Every call starts a new remote execution.
    async fn send(&self, goal: &TrajectoryGoal) -> Result<GoalId, ChannelError>;

    async fn subscribe_feedback(&self, goal: &GoalId) -> Result<FeedbackStream, ChannelError>;

    /// Ask the executor to stop `goal`. The outcome still arrives via `await_result`.
    async fn cancel(&self, goal: &GoalId) -> Result<(), ChannelError>;

    async fn await_result(&self, goal: &GoalId) -> Result<ResultEvent, ChannelError>;

    /// Drop local bookkeeping for a goal the client is done with. Messages
    /// that still arrive for it are ignored.
    async fn release(&self, _goal: &GoalId) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_event_json_shape() {
        let event = FeedbackEvent::Rejected { reason: Some("unknown joint".to_string()) };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "rejected");
        assert_eq!(json["reason"], "unknown joint");
    }

    #[test]
    fn test_goal_ids_are_unique() {
        assert_ne!(GoalId::new(), GoalId::new());
    }
}
