use std::sync::Arc;
use std::time::Duration;

use flotilla_bus::{MemoryBroker, MessageBus};
use flotilla_controller::{ControllerSettings, SessionOrchestrator};
use flotilla_protocol::{AgentId, FlotillaTopics};
use tokio::sync::watch;

fn heartbeat(agent: &str) -> Vec<u8> {
    format!(r#"{{"id": "{agent}", "timestamp": 1.0}}"#).into_bytes()
}

#[tokio::test]
async fn test_silent_agent_becomes_unreachable() {
    let broker = MemoryBroker::new();
    let topics = FlotillaTopics::default();
    let (client, inbound) = broker.connect("controller").await;
    let controller = Arc::new(SessionOrchestrator::new(
        ControllerSettings {
            topics: topics.clone(),
            heartbeat_interval: Duration::from_millis(20),
            missed_intervals: 3,
        },
        Arc::new(client),
    ));
    controller.subscribe().await.unwrap();

    let (shutdown, shutdown_rx) = watch::channel(false);
    let runner = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.run(inbound, shutdown_rx).await })
    };

    let (agents, _rx) = broker.connect("agents").await;
    let quiet = AgentId::new("quiet");
    let chatty = AgentId::new("chatty");
    agents
        .publish(&topics.heartbeat(&quiet), heartbeat("quiet"))
        .await
        .unwrap();

    // Keep one agent beating well past the staleness limit of the other.
    for _ in 0..10 {
        agents
            .publish(&topics.heartbeat(&chatty), heartbeat("chatty"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
    }

    assert_eq!(controller.unreachable_agents().await, vec![quiet.clone()]);

    // A fresh beat brings it back.
    agents
        .publish(&topics.heartbeat(&quiet), heartbeat("quiet"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!controller.unreachable_agents().await.contains(&quiet));

    shutdown.send(true).unwrap();
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_status_for_unknown_task_is_tracked_per_task() {
    let broker = MemoryBroker::new();
    let topics = FlotillaTopics::default();
    let (client, inbound) = broker.connect("controller").await;
    let controller = Arc::new(SessionOrchestrator::new(
        ControllerSettings::default(),
        Arc::new(client),
    ));
    controller.subscribe().await.unwrap();
    let (shutdown, shutdown_rx) = watch::channel(false);
    let runner = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.run(inbound, shutdown_rx).await })
    };

    let (agents, _rx) = broker.connect("agents").await;
    let agent = AgentId::new("a1");
    for status in ["TRAINING_STARTED", "ERROR"] {
        agents
            .publish(
                &topics.status(&agent),
                format!(r#"{{"task_id": "t1", "status": "{status}", "timestamp": 2.0, "message": "boom"}}"#)
                    .into_bytes(),
            )
            .await
            .unwrap();
    }
    broker.wait_for(&topics.status(&agent), 2, Duration::from_secs(1)).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    {
        let state = controller.shared_state();
        let state = state.read().await;
        let record = state.task("t1").unwrap();
        assert!(record.is_well_formed());
        assert_eq!(record.terminal().unwrap().message.as_deref(), Some("boom"));
        assert!(!record.result_received);
    }

    shutdown.send(true).unwrap();
    runner.await.unwrap().unwrap();
}
