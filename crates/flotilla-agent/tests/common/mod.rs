#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use flotilla_agent::{
    AgentConfig, AgentDescriptor, AgentError, AgentSettings, AgentState, FlotillaAgent, MockEngine,
};
use flotilla_bus::{MemoryBroker, MemoryClient, MessageBus};
use flotilla_controller::{ControllerSettings, SessionOrchestrator};
use flotilla_protocol::{
    decode, AgentId, CommandMessage, FlotillaTopics, StatusMessage, TaskAssignment, TaskStatus,
    TestParams, TrainParams, BenchmarkParams,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const AGENT: &str = "edge-1";

pub struct Session {
    pub broker: MemoryBroker,
    pub controller: Arc<SessionOrchestrator>,
    /// Extra client for publishing hand-written payloads.
    pub raw: MemoryClient,
    pub engine: Arc<MockEngine>,
    pub agent_state: AgentState,
    pub agent_id: AgentId,
    pub topics: FlotillaTopics,
    pub shutdown: watch::Sender<bool>,
    pub agent_task: JoinHandle<Result<(), AgentError>>,
    pub work_dir: tempfile::TempDir,
}

/// Start a controller and one agent on a fresh in-process broker. The
/// agent is not admitted yet.
pub async fn start(engine: MockEngine, heartbeat_interval: Duration) -> Session {
    let broker = MemoryBroker::new();
    let topics = FlotillaTopics::default();

    let (controller_client, controller_inbound) = broker.connect("controller").await;
    let controller = Arc::new(SessionOrchestrator::new(
        ControllerSettings {
            topics: topics.clone(),
            heartbeat_interval,
            missed_intervals: 3,
        },
        Arc::new(controller_client),
    ));
    controller.subscribe().await.unwrap();
    let (shutdown, shutdown_rx) = watch::channel(false);
    {
        let controller = Arc::clone(&controller);
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { controller.run(controller_inbound, shutdown_rx).await });
    }

    let work_dir = tempfile::tempdir().unwrap();
    let mut config = AgentConfig::default();
    config.agent.id = Some(AGENT.to_string());
    config.agent.name = "test bench".to_string();
    config.agent.work_dir = Some(work_dir.path().to_path_buf());
    config.handshake.timeout_secs = Some(10);
    let config = config.finalize().unwrap();

    let (agent_client, agent_inbound) = broker.connect(format!("agent-{AGENT}")).await;
    let engine = Arc::new(engine);
    let agent = FlotillaAgent::new(
        AgentDescriptor::from_config(&config),
        AgentSettings::from_config(&config),
        Arc::new(agent_client),
        agent_inbound,
        engine.clone(),
    );
    let agent_state = agent.shared_state();
    let agent_task = tokio::spawn(agent.run(shutdown_rx));

    let (raw, _raw_inbound) = broker.connect("raw").await;

    Session {
        broker,
        controller,
        raw,
        engine,
        agent_state,
        agent_id: AgentId::new(AGENT),
        topics,
        shutdown,
        agent_task,
        work_dir,
    }
}

/// Start a session and wait until the agent is admitted and beating.
pub async fn start_admitted(engine: MockEngine, heartbeat_interval: Duration) -> Session {
    let session = start(engine, heartbeat_interval).await;
    session.admit().await;
    session
}

impl Session {
    /// Advertise until the agent answers, then wait for its first heartbeat,
    /// which is sent only after it has subscribed to its command topics.
    pub async fn admit(&self) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            self.controller.advertise().await.unwrap();
            let answered = self
                .broker
                .wait_for(&self.topics.client_advertise(), 1, Duration::from_millis(50))
                .await;
            if !answered.is_empty() {
                break;
            }
            assert!(Instant::now() < deadline, "agent never answered");
        }
        let beats = self
            .broker
            .wait_for(&self.topics.heartbeat(&self.agent_id), 1, Duration::from_secs(5))
            .await;
        assert!(!beats.is_empty(), "agent never started heartbeating");

        let deadline = Instant::now() + Duration::from_secs(5);
        while !self
            .controller
            .shared_state()
            .read()
            .await
            .agents
            .contains_key(&self.agent_id)
        {
            assert!(Instant::now() < deadline, "controller never registered agent");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub async fn send(&self, command: &CommandMessage) {
        self.controller
            .send_command(&self.agent_id, command)
            .await
            .unwrap();
    }

    pub async fn send_raw(&self, payload: &str) {
        self.raw
            .publish(&self.topics.command(&self.agent_id), payload.as_bytes().to_vec())
            .await
            .unwrap();
    }

    /// Every status the agent published, in publish order.
    pub async fn statuses(&self) -> Vec<StatusMessage> {
        self.broker
            .published_on(&self.topics.status(&self.agent_id))
            .await
            .iter()
            .map(|m| decode(&m.payload).unwrap())
            .collect()
    }

    pub async fn statuses_for(&self, task_id: &str) -> Vec<StatusMessage> {
        self.statuses()
            .await
            .into_iter()
            .filter(|s| s.task_id.as_deref() == Some(task_id))
            .collect()
    }

    /// Poll until `task_id` has a terminal status, then give stray
    /// publishes a moment to show up.
    pub async fn wait_terminal(&self, task_id: &str) -> Vec<TaskStatus> {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let seq: Vec<TaskStatus> = self
                .statuses_for(task_id)
                .await
                .iter()
                .map(|s| s.status)
                .collect();
            if seq.iter().any(|s| s.is_terminal()) {
                tokio::time::sleep(Duration::from_millis(50)).await;
                return self
                    .statuses_for(task_id)
                    .await
                    .iter()
                    .map(|s| s.status)
                    .collect();
            }
            assert!(Instant::now() < deadline, "task {task_id} never finished: {seq:?}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let outcome = tokio::time::timeout(Duration::from_secs(5), self.agent_task)
            .await
            .expect("agent did not stop")
            .expect("agent task panicked");
        outcome.unwrap();
    }
}

pub fn train(task_id: &str, round_id: i64) -> CommandMessage {
    CommandMessage {
        task_id: task_id.into(),
        round_id: Some(round_id),
        session_id: Some("s1".into()),
        assignment: TaskAssignment::Train(TrainParams {
            model_id: "m1".into(),
            model_class: "Net".into(),
            model_config: None,
            dataset_id: "d1".into(),
            batch_size: 16,
            learning_rate: 0.01,
            num_epochs: 1,
            timeout_duration_s: None,
            max_epochs: None,
            max_mini_batches: None,
        }),
    }
}

pub fn test(task_id: &str) -> CommandMessage {
    CommandMessage {
        task_id: task_id.into(),
        round_id: Some(1),
        session_id: Some("s1".into()),
        assignment: TaskAssignment::Test(TestParams {
            model_id: "m1".into(),
            model_class: "Net".into(),
            model_config: None,
            dataset_id: "d1".into(),
            batch_size: 16,
        }),
    }
}

pub fn benchmark(task_id: &str, model_id: &str) -> CommandMessage {
    CommandMessage {
        task_id: task_id.into(),
        round_id: None,
        session_id: Some("s1".into()),
        assignment: TaskAssignment::Benchmark(BenchmarkParams {
            model_id: model_id.into(),
            model_class: "Net".into(),
            model_config: None,
            dataset_id: "d1".into(),
            batch_size: 16,
            learning_rate: 0.01,
            timeout_duration_s: Some(30.0),
            bench_minibatch_count: Some(4),
        }),
    }
}

/// A tar archive holding one regular file.
pub fn tar_archive(path: &str, contents: &[u8]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    builder.append_data(&mut header, path, contents).unwrap();
    builder.into_inner().unwrap()
}

/// A tar archive whose single entry name is written verbatim, bypassing the
/// builder's own path checks.
pub fn raw_tar_archive(name: &str, contents: &[u8]) -> Vec<u8> {
    let mut header = tar::Header::new_old();
    header.as_old_mut().name[..name.len()].copy_from_slice(name.as_bytes());
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();
    let mut builder = tar::Builder::new(Vec::new());
    builder.append(&header, contents).unwrap();
    builder.into_inner().unwrap()
}
