//! TCP action channel tests against the simulated executor server and
//! hand-driven fake executors

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use trajd::config::ConnectionConfig;
use trajd::executor_server;
use trajd::wire::{self, ClientMessage, ExecutorMessage, ResultStatus};
use trajd::{
    ActionChannel, ChannelError, ExecutionOutcome, GoalId, SimBehavior, SimulatedExecutor,
    StartTime, TcpActionChannel, TrajError, TrajectoryDispatcher, TrajectoryGoal, Waypoint,
    WaypointSet,
};

fn goal() -> TrajectoryGoal {
    let waypoints = WaypointSet::from_points(
        3,
        [
            Waypoint::new([0.2, 0.0, 3.4]),
            Waypoint::new([0.3, 0.1, 2.0]),
            Waypoint::new([0.6, 0.3, 0.0]).with_velocities([0.1, 0.1, 0.1]),
        ],
    )
    .unwrap();
    TrajectoryDispatcher::build_goal(
        ["joint_lift", "wrist_extension", "joint_wrist_yaw"],
        waypoints,
        "base_link",
        StartTime::Immediate,
    )
    .unwrap()
}

fn quick_connect() -> ConnectionConfig {
    ConnectionConfig {
        timeout: 1.0,
        retry_attempts: 1,
        retry_delay: 0.1,
    }
}

/// Serve `sim` on an ephemeral port and return a connected channel
async fn connect_to_sim(sim: SimulatedExecutor) -> TcpActionChannel {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(executor_server::serve(listener, sim));
    TcpActionChannel::connect(&addr, &quick_connect()).await.unwrap()
}

/// Accept one connection and read the goal the client sends
async fn accept_goal(listener: &TcpListener) -> (GoalId, BufReader<TcpStream>) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut stream = BufReader::new(stream);
    let mut line = String::new();
    stream.read_line(&mut line).await.unwrap();
    match wire::decode::<ClientMessage>(&line).unwrap() {
        ClientMessage::SendGoal { goal_id, goal } => {
            assert_eq!(goal.waypoints().len(), 3);
            (goal_id, stream)
        }
        other => panic!("expected send_goal, got {:?}", other),
    }
}

async fn write_message(stream: &mut BufReader<TcpStream>, message: &ExecutorMessage) {
    let line = wire::encode(message).unwrap();
    stream.get_mut().write_all(line.as_bytes()).await.unwrap();
}

#[tokio::test]
async fn test_round_trip_succeeds() {
    let sim = SimulatedExecutor::new(SimBehavior {
        point_interval: Duration::from_millis(20),
        ..SimBehavior::default()
    });
    let dispatcher = TrajectoryDispatcher::new(connect_to_sim(sim).await);

    let outcome = dispatcher
        .dispatch(&goal(), Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(outcome, ExecutionOutcome::Succeeded);
}

#[tokio::test]
async fn test_rejection_over_tcp() {
    let sim = SimulatedExecutor::new(SimBehavior {
        reject_reason: Some("frame 'odom' unknown".to_string()),
        ..SimBehavior::default()
    });
    let dispatcher = TrajectoryDispatcher::new(connect_to_sim(sim).await);

    let outcome = dispatcher
        .dispatch(&goal(), Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ExecutionOutcome::Rejected(Some("frame 'odom' unknown".to_string()))
    );
}

#[tokio::test]
async fn test_preempt_sends_cancel_over_tcp() {
    let sim = SimulatedExecutor::new(SimBehavior {
        point_interval: Duration::from_millis(200),
        ..SimBehavior::default()
    });
    let dispatcher = TrajectoryDispatcher::new(connect_to_sim(sim.clone()).await);
    let preempt = dispatcher.preempt_handle();

    let goal = goal();
    let (outcome, _) = tokio::join!(dispatcher.dispatch(&goal, None), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        preempt.preempt()
    });
    assert_eq!(outcome.unwrap(), ExecutionOutcome::Preempted);

    for _ in 0..100 {
        if !sim.cancel_requests().await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(sim.cancel_requests().await.len(), 1);
}

#[tokio::test]
async fn test_unreadable_goal_is_rejected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(executor_server::serve(listener, SimulatedExecutor::default()));

    let goal_id = GoalId::new();
    let mut stream = BufReader::new(TcpStream::connect(addr).await.unwrap());
    let line = format!(
        concat!(
            r#"{{"type":"send_goal","goal_id":"{}","#,
            r#""goal":{{"axes":["joint_lift"],"points":[{{"positions":[null]}}]}}}}"#,
            "\n"
        ),
        goal_id
    );
    stream.get_mut().write_all(line.as_bytes()).await.unwrap();

    let mut reply = String::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_line(&mut reply))
        .await
        .unwrap()
        .unwrap();
    match wire::decode::<ExecutorMessage>(&reply).unwrap() {
        ExecutorMessage::Rejected { goal_id: rejected, reason } => {
            assert_eq!(rejected, goal_id);
            assert!(reason.is_some());
        }
        other => panic!("expected rejected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fake_executor_result_after_garbage() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        let (goal_id, mut stream) = accept_goal(&listener).await;
        stream.get_mut().write_all(b"{not json}\n").await.unwrap();
        write_message(&mut stream, &ExecutorMessage::Accepted { goal_id }).await;
        write_message(
            &mut stream,
            &ExecutorMessage::Result {
                goal_id,
                status: ResultStatus::Aborted,
                reason: Some("lift stalled".to_string()),
            },
        )
        .await;
        // Hold the connection until the client is done.
        let mut rest = String::new();
        let _ = stream.read_line(&mut rest).await;
    });

    let channel = TcpActionChannel::connect(&addr, &quick_connect()).await.unwrap();
    let dispatcher = TrajectoryDispatcher::new(channel);
    let outcome = dispatcher
        .dispatch(&goal(), Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(outcome, ExecutionOutcome::Aborted(Some("lift stalled".to_string())));
}

#[tokio::test]
async fn test_disconnect_mid_goal_fails_before_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        let (goal_id, mut stream) = accept_goal(&listener).await;
        write_message(&mut stream, &ExecutorMessage::Accepted { goal_id }).await;
        // Connection drops here without a result.
    });

    let channel = TcpActionChannel::connect(&addr, &quick_connect()).await.unwrap();
    let dispatcher = TrajectoryDispatcher::new(channel);

    let started = std::time::Instant::now();
    let err = dispatcher
        .dispatch(&goal(), Some(Duration::from_secs(30)))
        .await
        .unwrap_err();

    assert!(matches!(err, TrajError::Channel(_)), "unexpected error: {}", err);
    assert!(started.elapsed() < Duration::from_secs(30));
}

#[tokio::test]
async fn test_send_after_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let _ = listener.accept().await;
    });

    let channel = TcpActionChannel::connect(&addr, &quick_connect()).await.unwrap();
    for _ in 0..100 {
        if !channel.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!channel.is_connected());

    let err = channel.send(&goal()).await.unwrap_err();
    assert!(matches!(err, ChannelError::Disconnected));
}

#[tokio::test]
async fn test_connect_failure() {
    // Grab a free port, then close it so nothing is listening.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    };

    match TcpActionChannel::connect(&addr, &quick_connect()).await {
        Err(ChannelError::Connect { addr: failed, .. }) => assert_eq!(failed, addr),
        Err(other) => panic!("expected connect error, got {}", other),
        Ok(_) => panic!("connected to a closed port"),
    }
}
