//! TCP action channel
//!
//! Talks the [`crate::wire`] JSON-lines protocol to a remote executor over a
//! single connection. A background task reads executor messages and routes
//! them to per-goal feedback streams and result slots. When the connection
//! drops, every route is discarded so in-flight dispatches fail with
//! [`ChannelError::Disconnected`] instead of waiting for their timeout.

use crate::channel::{ActionChannel, FeedbackEvent, FeedbackStream, GoalId, ResultEvent};
use crate::config::ConnectionConfig;
use crate::error::ChannelError;
use crate::goal::TrajectoryGoal;
use crate::wire::{self, ClientMessage, ExecutorMessage, Routed};
use async_trait::async_trait;
use futures::channel::{mpsc, oneshot};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default port of the executor bridge
pub const DEFAULT_EXECUTOR_PORT: u16 = 7450;

/// Senders stay with the reader task, receivers wait here until the client claims them
struct GoalRoute {
    events_tx: Option<mpsc::UnboundedSender<FeedbackEvent>>,
    events_rx: Option<mpsc::UnboundedReceiver<FeedbackEvent>>,
    result_tx: Option<oneshot::Sender<ResultEvent>>,
    result_rx: Option<oneshot::Receiver<ResultEvent>>,
}

impl GoalRoute {
    fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded();
        let (result_tx, result_rx) = oneshot::channel();
        Self {
            events_tx: Some(events_tx),
            events_rx: Some(events_rx),
            result_tx: Some(result_tx),
            result_rx: Some(result_rx),
        }
    }

    /// No more messages are expected and the client has taken both receivers
    fn is_spent(&self) -> bool {
        self.events_tx.is_none()
            && self.result_tx.is_none()
            && self.events_rx.is_none()
            && self.result_rx.is_none()
    }
}

type Routes = Arc<Mutex<HashMap<GoalId, GoalRoute>>>;

pub struct TcpActionChannel {
    addr: String,
    writer: Mutex<OwnedWriteHalf>,
    routes: Routes,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl TcpActionChannel {
    /// Connect to the executor at `addr`, retrying per `config`
    pub async fn connect(addr: &str, config: &ConnectionConfig) -> Result<Self, ChannelError> {
        let attempts = config.retry_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match tokio::time::timeout(config.timeout(), TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    info!("Connected to executor at {}", addr);
                    return Self::from_stream(addr, stream);
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = format!("timed out after {:.1}s", config.timeout),
            }

            warn!("Connection attempt {}/{} to {} failed: {}", attempt, attempts, addr, last_error);
            if attempt < attempts {
                tokio::time::sleep(config.retry_delay()).await;
            }
        }

        Err(ChannelError::Connect {
            addr: addr.to_string(),
            reason: last_error,
        })
    }

    /// Wrap an already connected stream
    pub fn from_stream(addr: &str, stream: TcpStream) -> Result<Self, ChannelError> {
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(read_loop(
            read_half,
            Arc::clone(&routes),
            Arc::clone(&connected),
        ));

        Ok(Self {
            addr: addr.to_string(),
            writer: Mutex::new(write_half),
            routes,
            connected,
            reader,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn write_message(&self, message: &ClientMessage) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::Disconnected);
        }
        let line = wire::encode(message)?;
        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))?;
        writer.flush().await.map_err(|e| ChannelError::Send(e.to_string()))
    }

    /// Error for a goal with no claimable route
    fn missing_route(&self, goal: &GoalId) -> ChannelError {
        if self.is_connected() {
            ChannelError::UnknownGoal(goal.to_string())
        } else {
            ChannelError::Disconnected
        }
    }
}

#[async_trait]
impl ActionChannel for TcpActionChannel {
    async fn send(&self, goal: &TrajectoryGoal) -> Result<GoalId, ChannelError> {
        let goal_id = GoalId::new();
        // Register first so a fast executor reply always finds its route.
        self.routes.lock().await.insert(goal_id, GoalRoute::new());

        let message = ClientMessage::SendGoal { goal_id, goal: goal.clone() };
        if let Err(e) = self.write_message(&message).await {
            self.routes.lock().await.remove(&goal_id);
            return Err(e);
        }
        debug!("Wrote goal {} to {}", goal_id, self.addr);
        Ok(goal_id)
    }

    async fn subscribe_feedback(&self, goal: &GoalId) -> Result<FeedbackStream, ChannelError> {
        let mut routes = self.routes.lock().await;
        let events = routes
            .get_mut(goal)
            .and_then(|route| route.events_rx.take())
            .ok_or_else(|| self.missing_route(goal))?;
        Ok(events.boxed())
    }

    async fn cancel(&self, goal: &GoalId) -> Result<(), ChannelError> {
        self.write_message(&ClientMessage::CancelGoal { goal_id: *goal }).await
    }

    async fn await_result(&self, goal: &GoalId) -> Result<ResultEvent, ChannelError> {
        let result = {
            let mut routes = self.routes.lock().await;
            let route = routes.get_mut(goal).ok_or_else(|| self.missing_route(goal))?;
            let result = route.result_rx.take().ok_or_else(|| self.missing_route(goal))?;
            if route.is_spent() {
                routes.remove(goal);
            }
            result
        };
        // The sender is dropped when the connection is lost.
        result.await.map_err(|_| ChannelError::Disconnected)
    }

    async fn release(&self, goal: &GoalId) {
        let mut routes = self.routes.lock().await;
        if routes.remove(goal).is_some() {
            debug!("Released goal {} ({} route(s) open)", goal, routes.len());
        }
    }
}

impl Drop for TcpActionChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(reader: OwnedReadHalf, routes: Routes, connected: Arc<AtomicBool>) {
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match wire::decode::<ExecutorMessage>(&line) {
                    Ok(message) => route_message(&routes, message).await,
                    Err(e) => warn!("Ignoring executor message: {}", e),
                }
            }
            Ok(None) => {
                warn!("Executor closed the connection");
                break;
            }
            Err(e) => {
                error!("Executor connection error: {}", e);
                break;
            }
        }
    }

    connected.store(false, Ordering::Release);
    let mut routes = routes.lock().await;
    if !routes.is_empty() {
        warn!("Dropping {} goal route(s) after disconnect", routes.len());
    }
    routes.clear();
}

async fn route_message(routes: &Routes, message: ExecutorMessage) {
    let goal_id = message.goal_id();
    let mut routes = routes.lock().await;
    let Some(route) = routes.get_mut(&goal_id) else {
        debug!("Message for unknown goal {} ignored", goal_id);
        return;
    };

    match Routed::from(message) {
        Routed::Event(event) => {
            let terminal = matches!(event, FeedbackEvent::Rejected { .. });
            if let Some(events_tx) = &route.events_tx {
                let _ = events_tx.unbounded_send(event);
            }
            if terminal {
                route.events_tx = None;
                route.result_tx = None;
            }
        }
        Routed::Result(result) => {
            if let Some(result_tx) = route.result_tx.take() {
                let _ = result_tx.send(result);
            }
            route.events_tx = None;
        }
    }

    if route.is_spent() {
        routes.remove(&goal_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::TrajectoryDispatcher;
    use crate::executor_server;
    use crate::goal::StartTime;
    use crate::sim::{SimBehavior, SimulatedExecutor};
    use crate::state::ExecutionOutcome;
    use crate::waypoint::{Waypoint, WaypointSet};
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn channel_to(sim: SimulatedExecutor) -> Arc<TcpActionChannel> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(executor_server::serve(listener, sim));
        let config = ConnectionConfig { timeout: 1.0, retry_attempts: 1, retry_delay: 0.1 };
        Arc::new(TcpActionChannel::connect(&addr, &config).await.unwrap())
    }

    fn goal() -> TrajectoryGoal {
        let set = WaypointSet::from_points(2, [Waypoint::new([0.2, 0.0])]).unwrap();
        TrajectoryDispatcher::build_goal(["lift", "yaw"], set, "base_link", StartTime::Immediate)
            .unwrap()
    }

    #[tokio::test]
    async fn test_rejected_goals_leave_no_routes() {
        let channel = channel_to(SimulatedExecutor::new(SimBehavior {
            reject_reason: Some("busy".to_string()),
            ..SimBehavior::default()
        }))
        .await;
        let dispatcher = TrajectoryDispatcher::from_arc(channel.clone());

        let goal = goal();
        for _ in 0..5 {
            let outcome = dispatcher.dispatch(&goal, Some(Duration::from_secs(5))).await.unwrap();
            assert_eq!(outcome, ExecutionOutcome::Rejected(Some("busy".to_string())));
        }
        assert!(channel.routes.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_timed_out_goal_leaves_no_route() {
        let channel = channel_to(SimulatedExecutor::new(SimBehavior {
            point_interval: Duration::from_secs(60),
            ..SimBehavior::default()
        }))
        .await;
        let dispatcher = TrajectoryDispatcher::from_arc(channel.clone());

        let outcome = dispatcher.dispatch(&goal(), Some(Duration::ZERO)).await.unwrap();
        assert_eq!(outcome, ExecutionOutcome::TimedOut);
        assert!(channel.routes.lock().await.is_empty());
    }
}
