//! TCP front end for the simulated executor
//!
//! Accepts dispatcher connections and serves the [`crate::wire`] protocol,
//! backed by a [`SimulatedExecutor`]. Each connection gets its own writer
//! task; every goal gets a forwarder that relays its events and then its
//! result, so the client sees them in executor order.

use crate::channel::{ActionChannel, GoalId};
use crate::error::ChannelError;
use crate::sim::SimulatedExecutor;
use crate::wire::{self, ClientMessage, ExecutorMessage};
use futures::StreamExt;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Accept connections until the listener fails
pub async fn serve(listener: TcpListener, executor: SimulatedExecutor) -> std::io::Result<()> {
    info!("Simulated executor listening on {}", listener.local_addr()?);
    loop {
        let (stream, peer) = listener.accept().await?;
        info!("Dispatcher connected from {}", peer);
        let executor = executor.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, executor).await {
                warn!("Connection {} ended with error: {}", peer, e);
            }
        });
    }
}

pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    executor: SimulatedExecutor,
) -> Result<(), ChannelError> {
    let (read_half, mut write_half) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ExecutorMessage>();

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let line = match wire::encode(&message) {
                Ok(line) => line,
                Err(e) => {
                    error!("Failed to encode executor message: {}", e);
                    continue;
                }
            };
            if let Err(e) = write_half.write_all(line.as_bytes()).await {
                warn!("Write to dispatcher failed: {}", e);
                break;
            }
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match wire::decode::<ClientMessage>(&line) {
            Ok(ClientMessage::SendGoal { goal_id, goal }) => {
                if let Err(e) = executor.submit(goal_id, goal).await {
                    let _ = out_tx.send(ExecutorMessage::Rejected {
                        goal_id,
                        reason: Some(e.to_string()),
                    });
                    continue;
                }
                tokio::spawn(forward_goal(executor.clone(), goal_id, out_tx.clone()));
            }
            Ok(ClientMessage::CancelGoal { goal_id }) => {
                if let Err(e) = executor.cancel(&goal_id).await {
                    debug!("Cancel from {} for goal {}: {}", peer, goal_id, e);
                }
            }
            Err(e) => {
                warn!("Bad message from {}: {}", peer, e);
                // A goal that cannot be read is still answered.
                if let Some(goal_id) = unreadable_goal_id(&line) {
                    let _ = out_tx.send(ExecutorMessage::Rejected {
                        goal_id,
                        reason: Some(e.to_string()),
                    });
                }
            }
        }
    }

    info!("Dispatcher {} disconnected", peer);
    drop(out_tx);
    let _ = writer.await;
    Ok(())
}

/// Relay one goal's events, then its result if it has one
async fn forward_goal(
    executor: SimulatedExecutor,
    goal_id: GoalId,
    out: mpsc::UnboundedSender<ExecutorMessage>,
) {
    let mut events = match executor.subscribe_feedback(&goal_id).await {
        Ok(events) => events,
        Err(e) => {
            error!("No event stream for goal {}: {}", goal_id, e);
            return;
        }
    };
    while let Some(event) = events.next().await {
        if out.send(ExecutorMessage::from_event(goal_id, event)).is_err() {
            return;
        }
    }

    // Rejected goals end without a result.
    if let Ok(result) = executor.await_result(&goal_id).await {
        let _ = out.send(ExecutorMessage::from_result(goal_id, result));
    }
    executor.release(&goal_id).await;
}

/// Goal id of a `send_goal` line whose goal failed to decode
fn unreadable_goal_id(line: &str) -> Option<GoalId> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    if value.get("type")?.as_str()? != "send_goal" {
        return None;
    }
    serde_json::from_value(value.get("goal_id")?.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreadable_goal_id() {
        let id = GoalId::new();
        let line = format!(
            r#"{{"type":"send_goal","goal_id":"{}","goal":{{"axes":["a"],"points":[{{"positions":[null]}}]}}}}"#,
            id
        );
        assert_eq!(unreadable_goal_id(&line), Some(id));
        assert_eq!(unreadable_goal_id(&format!(r#"{{"type":"cancel_goal","goal_id":"{}"}}"#, id)), None);
        assert_eq!(unreadable_goal_id("{not json"), None);
    }
}
