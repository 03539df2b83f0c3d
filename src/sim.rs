//! Simulated trajectory executor
//!
//! An in-process [`ActionChannel`] that plays goals back against a simple
//! time model: accept, report one progress event per waypoint at a fixed
//! interval, then succeed. Rejection and mid-trajectory aborts can be
//! configured. Used for dry runs, tests and the `trajd_sim` TCP executor.

use crate::channel::{
    ActionChannel, FeedbackEvent, FeedbackStream, GoalId, ResultEvent, TrajectoryFeedback,
};
use crate::config::SimulatorConfig;
use crate::error::ChannelError;
use crate::goal::TrajectoryGoal;
use async_trait::async_trait;
use futures::channel::{mpsc, oneshot};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How the simulated executor treats incoming goals
#[derive(Debug, Clone)]
pub struct SimBehavior {
    /// Time spent moving to each waypoint
    pub point_interval: Duration,
    /// Reject every goal with this reason
    pub reject_reason: Option<String>,
    /// Abort when reaching this waypoint index, with a reason
    pub abort_at: Option<(usize, String)>,
}

impl Default for SimBehavior {
    fn default() -> Self {
        Self {
            point_interval: Duration::from_millis(100),
            reject_reason: None,
            abort_at: None,
        }
    }
}

impl From<&SimulatorConfig> for SimBehavior {
    fn from(config: &SimulatorConfig) -> Self {
        Self {
            point_interval: Duration::from_millis(config.point_interval_ms()),
            reject_reason: config.reject_reason.clone(),
            abort_at: config
                .abort_at_waypoint
                .map(|index| (index, format!("simulated fault at waypoint {}", index))),
        }
    }
}

/// Per-goal plumbing kept until the client picks it up
struct SimGoal {
    events: Option<mpsc::UnboundedReceiver<FeedbackEvent>>,
    result: Option<oneshot::Receiver<ResultEvent>>,
    cancel: Option<oneshot::Sender<()>>,
}

#[derive(Clone, Default)]
pub struct SimulatedExecutor {
    behavior: SimBehavior,
    goals: Arc<Mutex<HashMap<GoalId, SimGoal>>>,
    cancel_requests: Arc<Mutex<Vec<GoalId>>>,
}

impl SimulatedExecutor {
    pub fn new(behavior: SimBehavior) -> Self {
        Self {
            behavior,
            goals: Arc::new(Mutex::new(HashMap::new())),
            cancel_requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Start executing `goal` under a caller-chosen id
    pub async fn submit(&self, id: GoalId, goal: TrajectoryGoal) -> Result<(), ChannelError> {
        let mut goals = self.goals.lock().await;
        if goals.contains_key(&id) {
            return Err(ChannelError::Send(format!("goal {} already submitted", id)));
        }

        let (event_tx, event_rx) = mpsc::unbounded();
        let (result_tx, result_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        goals.insert(
            id,
            SimGoal {
                events: Some(event_rx),
                result: Some(result_rx),
                cancel: Some(cancel_tx),
            },
        );
        drop(goals);

        info!("Simulating goal {} ({} waypoints)", id, goal.waypoints().len());
        tokio::spawn(run_goal(
            self.behavior.clone(),
            id,
            goal,
            event_tx,
            result_tx,
            cancel_rx,
        ));
        Ok(())
    }

    /// Every cancel request received, in order, including repeats
    pub async fn cancel_requests(&self) -> Vec<GoalId> {
        self.cancel_requests.lock().await.clone()
    }
}

#[async_trait]
impl ActionChannel for SimulatedExecutor {
    async fn send(&self, goal: &TrajectoryGoal) -> Result<GoalId, ChannelError> {
        let id = GoalId::new();
        self.submit(id, goal.clone()).await?;
        Ok(id)
    }

    async fn subscribe_feedback(&self, goal: &GoalId) -> Result<FeedbackStream, ChannelError> {
        let mut goals = self.goals.lock().await;
        let events = goals
            .get_mut(goal)
            .and_then(|entry| entry.events.take())
            .ok_or_else(|| ChannelError::UnknownGoal(goal.to_string()))?;
        Ok(events.boxed())
    }

    async fn cancel(&self, goal: &GoalId) -> Result<(), ChannelError> {
        self.cancel_requests.lock().await.push(*goal);

        let mut goals = self.goals.lock().await;
        let entry = goals
            .get_mut(goal)
            .ok_or_else(|| ChannelError::UnknownGoal(goal.to_string()))?;
        match entry.cancel.take() {
            Some(cancel) => {
                // Err means the goal already finished; nothing to stop.
                let _ = cancel.send(());
            }
            None => debug!("Goal {} already asked to cancel", goal),
        }
        Ok(())
    }

    async fn await_result(&self, goal: &GoalId) -> Result<ResultEvent, ChannelError> {
        let result = {
            let mut goals = self.goals.lock().await;
            goals
                .get_mut(goal)
                .and_then(|entry| entry.result.take())
                .ok_or_else(|| ChannelError::UnknownGoal(goal.to_string()))?
        };
        result.await.map_err(|_| ChannelError::Disconnected)
    }

    async fn release(&self, goal: &GoalId) {
        if let Some(entry) = self.goals.lock().await.remove(goal) {
            // A goal released mid-flight stops like a canceled one.
            if let Some(cancel) = entry.cancel {
                let _ = cancel.send(());
            }
        }
    }
}

async fn run_goal(
    behavior: SimBehavior,
    id: GoalId,
    goal: TrajectoryGoal,
    events: mpsc::UnboundedSender<FeedbackEvent>,
    result: oneshot::Sender<ResultEvent>,
    mut cancel: oneshot::Receiver<()>,
) {
    if let Some(reason) = behavior.reject_reason {
        info!("Rejecting goal {}: {}", id, reason);
        let _ = events.unbounded_send(FeedbackEvent::Rejected { reason: Some(reason) });
        return;
    }
    let _ = events.unbounded_send(FeedbackEvent::Accepted);

    for (index, point) in goal.waypoints().iter().enumerate() {
        if let Some((abort_index, reason)) = &behavior.abort_at {
            if *abort_index == index {
                warn!("Aborting goal {} at waypoint {}: {}", id, index, reason);
                let _ = result.send(ResultEvent::Aborted { reason: Some(reason.clone()) });
                return;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(behavior.point_interval) => {}
            _ = &mut cancel => {
                info!("Goal {} canceled at waypoint {}", id, index);
                let _ = result.send(ResultEvent::Canceled {
                    reason: Some("cancel requested".to_string()),
                });
                return;
            }
        }

        let _ = events.unbounded_send(FeedbackEvent::Progress(TrajectoryFeedback {
            waypoint_index: index,
            desired: point.positions.clone(),
            actual: Some(point.positions.clone()),
        }));
    }

    debug!("Goal {} reached its final waypoint", id);
    let _ = result.send(ResultEvent::Succeeded);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal::StartTime;
    use crate::waypoint::{AxisOrdering, Waypoint, WaypointSet};

    fn goal(points: usize) -> TrajectoryGoal {
        let axes = AxisOrdering::new(["lift", "extension"]).unwrap();
        let mut set = WaypointSet::for_axes(&axes);
        for i in 0..points {
            set.add(Waypoint::new([i as f64 * 0.1, 0.0])).unwrap();
        }
        TrajectoryGoal::new(axes, set, "base_link", StartTime::Immediate).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_then_success() {
        let sim = SimulatedExecutor::default();
        let id = sim.send(&goal(3)).await.unwrap();
        let events: Vec<_> = sim.subscribe_feedback(&id).await.unwrap().collect().await;

        assert_eq!(events[0], FeedbackEvent::Accepted);
        assert_eq!(events.len(), 4);
        assert!(matches!(
            &events[3],
            FeedbackEvent::Progress(TrajectoryFeedback { waypoint_index: 2, .. })
        ));
        assert_eq!(sim.await_result(&id).await.unwrap(), ResultEvent::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_at_waypoint() {
        let sim = SimulatedExecutor::new(SimBehavior {
            abort_at: Some((1, "lift stalled".to_string())),
            ..SimBehavior::default()
        });
        let id = sim.send(&goal(3)).await.unwrap();
        assert_eq!(
            sim.await_result(&id).await.unwrap(),
            ResultEvent::Aborted { reason: Some("lift stalled".to_string()) }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_goals_are_pruned() {
        let sim = SimulatedExecutor::default();
        let id = sim.send(&goal(2)).await.unwrap();
        assert_eq!(sim.await_result(&id).await.unwrap(), ResultEvent::Succeeded);

        sim.release(&id).await;
        assert!(sim.goals.lock().await.is_empty());
        assert!(matches!(sim.cancel(&id).await, Err(ChannelError::UnknownGoal(_))));
    }

    #[tokio::test]
    async fn test_unknown_goal() {
        let sim = SimulatedExecutor::default();
        let err = sim.await_result(&GoalId::new()).await.unwrap_err();
        assert!(matches!(err, ChannelError::UnknownGoal(_)));
    }
}
