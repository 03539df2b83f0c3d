//! Telemetry abstraction for dispatch events
//!
//! The dispatcher reports state transitions, executor feedback and outcomes
//! through [`DispatchTelemetry`] so the core stays independent of where those
//! events end up (stdout JSON lines, a message bus, nowhere).

use crate::json_output::{FeedbackOutputEvent, GoalStatusEvent, OutcomeEvent};
use async_trait::async_trait;
use serde::Serialize;

/// Trait for publishing dispatch telemetry
#[async_trait]
pub trait DispatchTelemetry: Send + Sync {
    async fn publish_status(&self, event: &GoalStatusEvent) -> anyhow::Result<()>;

    async fn publish_feedback(&self, event: &FeedbackOutputEvent) -> anyhow::Result<()>;

    async fn publish_outcome(&self, event: &OutcomeEvent) -> anyhow::Result<()>;
}

/// Discards everything. Default for library users.
#[derive(Debug, Clone, Default)]
pub struct NoOpTelemetry;

#[async_trait]
impl DispatchTelemetry for NoOpTelemetry {
    async fn publish_status(&self, _event: &GoalStatusEvent) -> anyhow::Result<()> {
        Ok(())
    }

    async fn publish_feedback(&self, _event: &FeedbackOutputEvent) -> anyhow::Result<()> {
        Ok(())
    }

    async fn publish_outcome(&self, _event: &OutcomeEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Console telemetry publisher
///
/// Prints events to stdout as JSON, one per line unless `pretty_print` is set.
/// Feedback can be muted since executors may report it at a high rate.
#[derive(Debug, Clone)]
pub struct ConsoleTelemetry {
    pub pretty_print: bool,
    pub show_feedback: bool,
}

impl ConsoleTelemetry {
    pub fn new() -> Self {
        Self { pretty_print: false, show_feedback: true }
    }

    pub fn pretty() -> Self {
        Self { pretty_print: true, show_feedback: true }
    }

    pub fn without_feedback(mut self) -> Self {
        self.show_feedback = false;
        self
    }

    fn print<T: Serialize>(&self, event: &T) -> anyhow::Result<()> {
        if self.pretty_print {
            println!("{}", serde_json::to_string_pretty(event)?);
        } else {
            println!("{}", serde_json::to_string(event)?);
        }
        Ok(())
    }
}

impl Default for ConsoleTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DispatchTelemetry for ConsoleTelemetry {
    async fn publish_status(&self, event: &GoalStatusEvent) -> anyhow::Result<()> {
        self.print(event)
    }

    async fn publish_feedback(&self, event: &FeedbackOutputEvent) -> anyhow::Result<()> {
        if self.show_feedback {
            self.print(event)?;
        }
        Ok(())
    }

    async fn publish_outcome(&self, event: &OutcomeEvent) -> anyhow::Result<()> {
        self.print(event)
    }
}
