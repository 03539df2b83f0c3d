//! TrajectoryDispatcher - Owns one goal from construction to terminal outcome
//!
//! Builds validated [`TrajectoryGoal`]s, sends them over an [`ActionChannel`]
//! and follows the executor's events until the dispatch reaches a terminal
//! state. Remote failures (rejection, abort, preemption, timeout) come back as
//! [`ExecutionOutcome`] values; only validation and transport failures are
//! errors.
//!
//! One dispatcher runs at most one goal at a time: [`TrajectoryDispatcher::start`]
//! holds the dispatch lock until the goal is terminal, so a concurrent dispatch
//! on the same dispatcher waits for the first to finish.

use crate::channel::{ActionChannel, FeedbackEvent, FeedbackStream, GoalId, ResultEvent};
use crate::error::{ChannelError, Result, ValidationError};
use crate::goal::{StartTime, TrajectoryGoal};
use crate::json_output::{FeedbackOutputEvent, GoalStatusEvent, OutcomeEvent};
use crate::state::{DispatchState, ExecutionOutcome, Transition};
use crate::telemetry::{DispatchTelemetry, NoOpTelemetry};
use crate::waypoint::{AxisOrdering, WaypointSet};
use futures::{FutureExt, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Client-side handle to one sent goal.
///
/// Clones share state, so a handle kept by the caller observes the dispatch
/// reaching its terminal state. A goal the dispatcher gives up on without an
/// outcome (its [`ActiveGoal`] dropped, or its transport lost before
/// acceptance) is also left in [`DispatchState::Preempted`]; the caller then
/// sees an error or nothing rather than [`ExecutionOutcome::Preempted`].
#[derive(Clone)]
pub struct GoalHandle {
    id: GoalId,
    state: Arc<watch::Sender<DispatchState>>,
    preempt: Arc<watch::Sender<bool>>,
}

impl GoalHandle {
    fn new(id: GoalId) -> Self {
        Self {
            id,
            state: Arc::new(watch::Sender::new(DispatchState::Idle)),
            preempt: Arc::new(watch::Sender::new(false)),
        }
    }

    pub fn id(&self) -> GoalId {
        self.id
    }

    pub fn state(&self) -> DispatchState {
        *self.state.borrow()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Receiver notified on every state change
    pub fn watch_state(&self) -> watch::Receiver<DispatchState> {
        self.state.subscribe()
    }

    /// Apply a transition, returning the new state if it was allowed
    fn apply(&self, transition: Transition) -> Option<DispatchState> {
        let mut next = None;
        self.state.send_if_modified(|state| match state.advance(transition) {
            Some(advanced) => {
                *state = advanced;
                next = Some(advanced);
                true
            }
            None => false,
        });
        next
    }

    /// Flag the goal for preemption. Returns false once terminal.
    fn request_preempt(&self) -> bool {
        if self.is_terminal() {
            return false;
        }
        !self.preempt.send_replace(true)
    }
}

impl fmt::Debug for GoalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoalHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Delivers the external preemption signal to whatever goal the dispatcher is running.
///
/// Cheap to clone and `'static`, so it can be moved into signal handlers.
#[derive(Clone)]
pub struct PreemptHandle {
    current: Arc<watch::Sender<Option<GoalHandle>>>,
}

impl PreemptHandle {
    /// Returns whether a running goal received the signal. A no-op when idle
    /// or once the current goal is terminal.
    pub fn preempt(&self) -> bool {
        match self.current.borrow().as_ref() {
            Some(handle) => handle.request_preempt(),
            None => false,
        }
    }
}

/// Sends trajectory goals and observes them to a terminal outcome
pub struct TrajectoryDispatcher {
    channel: Arc<dyn ActionChannel>,
    dispatch_lock: Mutex<()>,
    current: Arc<watch::Sender<Option<GoalHandle>>>,
    telemetry: Arc<dyn DispatchTelemetry>,
}

impl TrajectoryDispatcher {
    pub fn new(channel: impl ActionChannel + 'static) -> Self {
        Self::from_arc(Arc::new(channel))
    }

    /// Share a channel the caller keeps its own reference to
    pub fn from_arc(channel: Arc<dyn ActionChannel>) -> Self {
        Self {
            channel,
            dispatch_lock: Mutex::new(()),
            current: Arc::new(watch::Sender::new(None)),
            telemetry: Arc::new(NoOpTelemetry),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn DispatchTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn channel(&self) -> &Arc<dyn ActionChannel> {
        &self.channel
    }

    pub fn preempt_handle(&self) -> PreemptHandle {
        PreemptHandle {
            current: Arc::clone(&self.current),
        }
    }

    /// Validate the axis ordering against the waypoint set and assemble the goal.
    ///
    /// Never touches the channel; failures here are caller bugs.
    pub fn build_goal<I, S>(
        axis_ordering: I,
        waypoints: WaypointSet,
        frame_id: impl Into<String>,
        start_time: StartTime,
    ) -> std::result::Result<TrajectoryGoal, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let axes = AxisOrdering::new(axis_ordering)?;
        TrajectoryGoal::new(axes, waypoints, frame_id, start_time)
    }

    /// Send `goal` and wait for its terminal outcome.
    ///
    /// `timeout` is measured from the moment the goal is sent. Every call
    /// creates a new remote execution.
    pub async fn dispatch(
        &self,
        goal: &TrajectoryGoal,
        timeout: Option<Duration>,
    ) -> Result<ExecutionOutcome> {
        self.start(goal).await?.wait(timeout).await
    }

    /// Send `goal` and return the in-flight dispatch without waiting on it.
    pub async fn start(&self, goal: &TrajectoryGoal) -> Result<ActiveGoal<'_>> {
        let guard = self.dispatch_lock.lock().await;

        let id = self.channel.send(goal).await?;
        let sent_at = Instant::now();
        let handle = GoalHandle::new(id);
        handle.apply(Transition::Sent);
        info!(
            "Sent goal {} with {} waypoints over {} axes (frame '{}')",
            id,
            goal.waypoints().len(),
            goal.axes().len(),
            goal.frame_id()
        );

        let events = match self.channel.subscribe_feedback(&id).await {
            Ok(events) => events,
            Err(e) => {
                // The goal is already out; don't leave it running unobserved.
                handle.apply(Transition::Preempted);
                if let Err(cancel_err) = self.channel.cancel(&id).await {
                    warn!("Failed to cancel goal {} after subscribe error: {}", id, cancel_err);
                }
                self.channel.release(&id).await;
                return Err(e.into());
            }
        };

        let preempt = handle.preempt.subscribe();
        self.current.send_replace(Some(handle.clone()));
        self.publish_status(&handle, "goal sent to executor").await;

        Ok(ActiveGoal {
            dispatcher: self,
            _guard: guard,
            handle,
            events,
            preempt,
            sent_at,
        })
    }

    /// Request cancellation of `handle`'s goal.
    ///
    /// The running dispatch issues the cancel to the executor and reports
    /// [`ExecutionOutcome::Preempted`]. Returns false, doing nothing, when the
    /// goal is already terminal.
    pub fn cancel(&self, handle: &GoalHandle) -> bool {
        if handle.is_terminal() {
            debug!("Cancel of goal {} ignored: already {}", handle.id, handle.state());
            return false;
        }
        handle.request_preempt()
    }

    async fn publish_status(&self, handle: &GoalHandle, message: &str) {
        let event = GoalStatusEvent::new(handle.id, handle.state(), message);
        if let Err(e) = self.telemetry.publish_status(&event).await {
            warn!("Failed to publish goal status: {}", e);
        }
    }

    /// Record a terminal outcome and report it
    async fn finish(
        &self,
        handle: &GoalHandle,
        transition: Transition,
        outcome: ExecutionOutcome,
        sent_at: Instant,
    ) -> Result<ExecutionOutcome> {
        if handle.apply(transition).is_none() {
            warn!("Goal {}: {:?} not allowed from {}", handle.id, transition, handle.state());
        }

        let elapsed = sent_at.elapsed();
        if outcome.is_success() {
            info!("Goal {} succeeded in {:.2}s", handle.id, elapsed.as_secs_f64());
        } else {
            warn!("Goal {} finished {} after {:.2}s", handle.id, outcome, elapsed.as_secs_f64());
        }

        self.publish_status(handle, &outcome.to_string()).await;
        let event = OutcomeEvent::new(handle.id, outcome.clone(), elapsed.as_millis() as u64);
        if let Err(e) = self.telemetry.publish_outcome(&event).await {
            warn!("Failed to publish outcome: {}", e);
        }
        Ok(outcome)
    }

    /// Terminate locally and make sure the executor stops the goal too
    async fn terminate_with_cancel(
        &self,
        handle: &GoalHandle,
        transition: Transition,
        outcome: ExecutionOutcome,
        sent_at: Instant,
    ) -> Result<ExecutionOutcome> {
        info!("Cancelling goal {} on executor ({})", handle.id, outcome);
        if let Err(e) = self.channel.cancel(&handle.id).await {
            error!("Cancel request for goal {} failed: {}", handle.id, e);
        }
        self.finish(handle, transition, outcome, sent_at).await
    }

    async fn finish_with_result(
        &self,
        handle: &GoalHandle,
        result: ResultEvent,
        sent_at: Instant,
    ) -> Result<ExecutionOutcome> {
        let (transition, outcome) = match result {
            ResultEvent::Succeeded => (Transition::Succeeded, ExecutionOutcome::Succeeded),
            ResultEvent::Aborted { reason } => {
                (Transition::Aborted, ExecutionOutcome::Aborted(reason))
            }
            ResultEvent::Canceled { reason } => {
                if let Some(reason) = reason {
                    info!("Goal {} canceled by executor: {}", handle.id, reason);
                }
                (Transition::Preempted, ExecutionOutcome::Preempted)
            }
        };
        self.finish(handle, transition, outcome, sent_at).await
    }
}

/// A sent goal whose outcome has not been collected yet.
///
/// Dropping it before [`ActiveGoal::wait`] returns cancels the goal on the
/// executor.
pub struct ActiveGoal<'a> {
    dispatcher: &'a TrajectoryDispatcher,
    _guard: MutexGuard<'a, ()>,
    handle: GoalHandle,
    events: FeedbackStream,
    preempt: watch::Receiver<bool>,
    sent_at: Instant,
}

impl ActiveGoal<'_> {
    pub fn handle(&self) -> &GoalHandle {
        &self.handle
    }

    pub fn state(&self) -> DispatchState {
        self.handle.state()
    }

    /// Follow the goal until it is terminal or `timeout` (from send) elapses.
    ///
    /// A result that is already available when the deadline is checked wins
    /// over the timeout.
    pub async fn wait(mut self, timeout: Option<Duration>) -> Result<ExecutionOutcome> {
        let outcome = self.follow(timeout).await;
        self.dispatcher.channel.release(&self.handle.id).await;
        outcome
    }

    async fn follow(&mut self, timeout: Option<Duration>) -> Result<ExecutionOutcome> {
        let dispatcher = self.dispatcher;
        let id = self.handle.id;
        let sent_at = self.sent_at;
        let deadline = timeout.map(|timeout| sent_at + timeout);

        let result = dispatcher.channel.await_result(&id);
        tokio::pin!(result);
        // Without a deadline the sleep branch is disabled; the instant is never reached.
        let sleep = tokio::time::sleep_until(deadline.unwrap_or(sent_at));
        tokio::pin!(sleep);
        let mut events_open = true;

        loop {
            let state = self.handle.state();

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                if state == DispatchState::Active {
                    if let Some(result) = result.as_mut().now_or_never() {
                        return dispatcher.finish_with_result(&self.handle, result?, sent_at).await;
                    }
                }
                return dispatcher
                    .terminate_with_cancel(
                        &self.handle,
                        Transition::DeadlineElapsed,
                        ExecutionOutcome::TimedOut,
                        sent_at,
                    )
                    .await;
            }

            tokio::select! {
                biased;

                result = &mut result, if state == DispatchState::Active => {
                    return dispatcher.finish_with_result(&self.handle, result?, sent_at).await;
                }

                event = self.events.next(), if events_open => match event {
                    Some(FeedbackEvent::Accepted) => {
                        if self.handle.apply(Transition::Accepted).is_some() {
                            info!("Goal {} accepted by executor", id);
                            dispatcher.publish_status(&self.handle, "goal accepted").await;
                        } else {
                            warn!("Ignoring duplicate accept for goal {} in state {}", id, state);
                        }
                    }
                    Some(FeedbackEvent::Rejected { reason }) => {
                        if state == DispatchState::Pending {
                            return dispatcher
                                .finish(
                                    &self.handle,
                                    Transition::Rejected,
                                    ExecutionOutcome::Rejected(reason),
                                    sent_at,
                                )
                                .await;
                        }
                        warn!("Ignoring rejection of goal {} in state {}", id, state);
                    }
                    Some(FeedbackEvent::Progress(feedback)) => {
                        debug!("Goal {} heading to waypoint {}", id, feedback.waypoint_index);
                        let event = FeedbackOutputEvent::new(id, feedback);
                        if let Err(e) = dispatcher.telemetry.publish_feedback(&event).await {
                            warn!("Failed to publish feedback: {}", e);
                        }
                    }
                    None => {
                        events_open = false;
                        if state == DispatchState::Pending {
                            self.handle.apply(Transition::Preempted);
                            return Err(ChannelError::StreamClosed(id.to_string()).into());
                        }
                        debug!("Feedback stream for goal {} closed, waiting on result", id);
                    }
                },

                _ = preempt_requested(&mut self.preempt) => {
                    return dispatcher
                        .terminate_with_cancel(
                            &self.handle,
                            Transition::Preempted,
                            ExecutionOutcome::Preempted,
                            sent_at,
                        )
                        .await;
                }

                // Wakes the loop so the deadline check above runs.
                _ = &mut sleep, if deadline.is_some() => {}
            }
        }
    }
}

impl Drop for ActiveGoal<'_> {
    fn drop(&mut self) {
        self.dispatcher.current.send_replace(None);
        if self.handle.is_terminal() {
            return;
        }

        // Abandoned mid-flight: stop the remote goal on a best-effort basis.
        self.handle.apply(Transition::Preempted);
        let channel = Arc::clone(&self.dispatcher.channel);
        let id = self.handle.id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!("Goal {} dropped before completion, cancelling", id);
                runtime.spawn(async move {
                    if let Err(e) = channel.cancel(&id).await {
                        error!("Cancel of abandoned goal {} failed: {}", id, e);
                    }
                    channel.release(&id).await;
                });
            }
            Err(_) => error!("Goal {} dropped outside a runtime; it may still be executing", id),
        }
    }
}

async fn preempt_requested(preempt: &mut watch::Receiver<bool>) {
    if preempt.wait_for(|requested| *requested).await.is_err() {
        // Sender lives in the goal handle; if it is gone, no preemption can arrive.
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waypoint::Waypoint;

    fn lift_extension_yaw() -> Vec<&'static str> {
        vec!["lift", "extension", "yaw"]
    }

    #[test]
    fn test_build_goal_keeps_order() {
        let points = vec![
            Waypoint::new([0.2, 0.0, 3.4]),
            Waypoint::new([0.6, 0.3, 0.0]).with_velocities([0.1, 0.1, 0.1]),
        ];
        let set = WaypointSet::from_points(3, points.clone()).unwrap();
        let goal = TrajectoryDispatcher::build_goal(
            lift_extension_yaw(),
            set,
            "base_link",
            StartTime::Immediate,
        )
        .unwrap();
        assert_eq!(goal.waypoints().as_slice(), points.as_slice());
        assert_eq!(goal.axes().names(), ["lift", "extension", "yaw"]);
    }

    #[test]
    fn test_build_goal_rejects_duplicate_axes() {
        let mut set = WaypointSet::new(3);
        set.add(Waypoint::new([0.0, 0.0, 0.0])).unwrap();
        let err = TrajectoryDispatcher::build_goal(
            ["lift", "yaw", "lift"],
            set,
            "base_link",
            StartTime::Immediate,
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::DuplicateAxis("lift".to_string()));
    }

    #[test]
    fn test_build_goal_rejects_axis_count_mismatch() {
        let mut set = WaypointSet::new(2);
        set.add(Waypoint::new([0.2, 0.0])).unwrap();
        let err = TrajectoryDispatcher::build_goal(
            lift_extension_yaw(),
            set,
            "base_link",
            StartTime::Immediate,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::AxisCountMismatch { .. }));
    }

    #[test]
    fn test_handle_transitions_stop_at_terminal() {
        let handle = GoalHandle::new(GoalId::new());
        assert_eq!(handle.apply(Transition::Sent), Some(DispatchState::Pending));
        assert_eq!(handle.apply(Transition::Rejected), Some(DispatchState::Rejected));
        assert_eq!(handle.apply(Transition::Accepted), None);
        assert!(!handle.request_preempt());
    }

    #[test]
    fn test_preempt_handle_idle_is_noop() {
        let dispatcher = TrajectoryDispatcher::new(crate::sim::SimulatedExecutor::default());
        assert!(!dispatcher.preempt_handle().preempt());
    }
}
