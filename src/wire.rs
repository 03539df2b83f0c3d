//! JSON-lines wire protocol between the dispatcher and a remote executor
//!
//! One JSON object per line, discriminated by `type`. The client generates
//! goal ids; every executor message names the goal it refers to.

use crate::channel::{FeedbackEvent, GoalId, ResultEvent, TrajectoryFeedback};
use crate::error::ChannelError;
use crate::goal::TrajectoryGoal;
use serde::{Deserialize, Serialize};

/// Client → executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SendGoal { goal_id: GoalId, goal: TrajectoryGoal },
    CancelGoal { goal_id: GoalId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Succeeded,
    Aborted,
    Canceled,
}

/// Executor → client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutorMessage {
    Accepted {
        goal_id: GoalId,
    },
    Rejected {
        goal_id: GoalId,
        #[serde(default)]
        reason: Option<String>,
    },
    Feedback {
        goal_id: GoalId,
        feedback: TrajectoryFeedback,
    },
    Result {
        goal_id: GoalId,
        status: ResultStatus,
        #[serde(default)]
        reason: Option<String>,
    },
}

impl ExecutorMessage {
    pub fn goal_id(&self) -> GoalId {
        match self {
            ExecutorMessage::Accepted { goal_id }
            | ExecutorMessage::Rejected { goal_id, .. }
            | ExecutorMessage::Feedback { goal_id, .. }
            | ExecutorMessage::Result { goal_id, .. } => *goal_id,
        }
    }

    pub fn from_event(goal_id: GoalId, event: FeedbackEvent) -> Self {
        match event {
            FeedbackEvent::Accepted => ExecutorMessage::Accepted { goal_id },
            FeedbackEvent::Rejected { reason } => ExecutorMessage::Rejected { goal_id, reason },
            FeedbackEvent::Progress(feedback) => ExecutorMessage::Feedback { goal_id, feedback },
        }
    }

    pub fn from_result(goal_id: GoalId, result: ResultEvent) -> Self {
        let (status, reason) = match result {
            ResultEvent::Succeeded => (ResultStatus::Succeeded, None),
            ResultEvent::Aborted { reason } => (ResultStatus::Aborted, reason),
            ResultEvent::Canceled { reason } => (ResultStatus::Canceled, reason),
        };
        ExecutorMessage::Result { goal_id, status, reason }
    }
}

/// What a decoded executor message means for the goal it names
pub enum Routed {
    Event(FeedbackEvent),
    Result(ResultEvent),
}

impl From<ExecutorMessage> for Routed {
    fn from(message: ExecutorMessage) -> Self {
        match message {
            ExecutorMessage::Accepted { .. } => Routed::Event(FeedbackEvent::Accepted),
            ExecutorMessage::Rejected { reason, .. } => {
                Routed::Event(FeedbackEvent::Rejected { reason })
            }
            ExecutorMessage::Feedback { feedback, .. } => {
                Routed::Event(FeedbackEvent::Progress(feedback))
            }
            ExecutorMessage::Result { status, reason, .. } => Routed::Result(match status {
                ResultStatus::Succeeded => ResultEvent::Succeeded,
                ResultStatus::Aborted => ResultEvent::Aborted { reason },
                ResultStatus::Canceled => ResultEvent::Canceled { reason },
            }),
        }
    }
}

/// Serialize `message` as one newline-terminated line
pub fn encode<T: Serialize>(message: &T) -> Result<String, ChannelError> {
    let mut line =
        serde_json::to_string(message).map_err(|e| ChannelError::Protocol(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

pub fn decode<'a, T: Deserialize<'a>>(line: &'a str) -> Result<T, ChannelError> {
    serde_json::from_str(line.trim()).map_err(|e| ChannelError::Protocol(e.to_string()))
}
