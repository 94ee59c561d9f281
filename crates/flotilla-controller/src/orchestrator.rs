//! Session orchestrator: the controller's side of every topic.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flotilla_bus::{BusMessage, Inbound, MessageBus};
use flotilla_protocol::digest::sha256_hex;
use flotilla_protocol::{
    decode, encode, encode_blob, AdvertiseBroadcast, AdvertiseResponse, AgentId, CommandMessage,
    FlotillaTopics, GlobalModelBroadcast, HeartbeatMessage, ModelArtifactPush, ProtocolError,
    StatusMessage, TaskKind, DEFAULT_HEARTBEAT_INTERVAL_SECS,
};
use tokio::sync::{watch, RwLock};

use crate::error::ControllerError;
use crate::registry::{ControllerState, ReceivedResult};

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub topics: FlotillaTopics,
    /// Interval announced to agents in every advertisement.
    pub heartbeat_interval: Duration,
    /// Silent intervals tolerated before an agent counts as unreachable.
    pub missed_intervals: u32,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            topics: FlotillaTopics::default(),
            heartbeat_interval: Duration::from_secs_f64(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            missed_intervals: 3,
        }
    }
}

pub struct SessionOrchestrator {
    settings: ControllerSettings,
    bus: Arc<dyn MessageBus>,
    state: Arc<RwLock<ControllerState>>,
}

impl SessionOrchestrator {
    pub fn new(settings: ControllerSettings, bus: Arc<dyn MessageBus>) -> Self {
        let state = ControllerState::new(settings.missed_intervals);
        Self {
            settings,
            bus,
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub fn shared_state(&self) -> Arc<RwLock<ControllerState>> {
        Arc::clone(&self.state)
    }

    pub fn topics(&self) -> &FlotillaTopics {
        &self.settings.topics
    }

    /// Subscribe to every agent-written topic.
    pub async fn subscribe(&self) -> Result<(), ControllerError> {
        let topics = &self.settings.topics;
        for filter in [
            topics.client_advertise(),
            topics.heartbeat_filter(),
            topics.status_filter(),
            topics.result_filter(),
        ] {
            self.bus.subscribe(&filter).await?;
        }
        Ok(())
    }

    /// Invite agents to (re-)register, announcing the heartbeat interval.
    pub async fn advertise(&self) -> Result<(), ControllerError> {
        let broadcast = AdvertiseBroadcast::new(self.settings.heartbeat_interval.as_secs_f64());
        self.bus
            .publish(&self.settings.topics.server_advertise(), encode(&broadcast)?)
            .await?;
        tracing::info!(
            heartbeat_interval_s = broadcast.heartbeat_interval,
            "Advertisement broadcast"
        );
        Ok(())
    }

    /// Change the announced interval; takes effect at the next advertisement.
    pub fn set_heartbeat_interval(&mut self, interval: Duration) {
        self.settings.heartbeat_interval = interval;
    }

    pub async fn send_command(
        &self,
        agent_id: &AgentId,
        command: &CommandMessage,
    ) -> Result<(), ControllerError> {
        if !self.state.read().await.agents.contains_key(agent_id) {
            return Err(ControllerError::UnknownAgent(agent_id.to_string()));
        }
        let payload = encode(&command.to_envelope()?)?;
        self.bus
            .publish(&self.settings.topics.command(agent_id), payload)
            .await?;
        tracing::info!(
            agent_id = %agent_id,
            task_id = %command.task_id,
            kind = %command.kind(),
            "Command sent"
        );
        Ok(())
    }

    pub async fn broadcast_global_model(
        &self,
        round_id: Option<i64>,
        weights: Option<&[u8]>,
    ) -> Result<(), ControllerError> {
        let broadcast = GlobalModelBroadcast {
            round_id,
            weights_b64: weights.map(encode_blob),
        };
        self.bus
            .publish(&self.settings.topics.model_global(), encode(&broadcast)?)
            .await?;
        tracing::info!(round_id = ?round_id, "Global model broadcast");
        Ok(())
    }

    /// Push packaged model code, with its SHA-256 so agents can verify it.
    pub async fn push_artifact(&self, model_id: &str, archive: &[u8]) -> Result<(), ControllerError> {
        let push = ModelArtifactPush {
            model_id: model_id.to_string(),
            artifact_b64: encode_blob(archive),
            sha256: Some(sha256_hex(archive)),
        };
        self.bus
            .publish(&self.settings.topics.model_artifact(model_id), encode(&push)?)
            .await?;
        tracing::info!(model_id, archive_bytes = archive.len(), "Model artifact pushed");
        Ok(())
    }

    /// Apply one inbound message to the controller state. Malformed
    /// messages are logged and dropped.
    pub async fn handle_message(&self, message: &BusMessage) {
        if let Err(e) = self.route(message).await {
            tracing::warn!(topic = %message.topic, error = %e, "Dropping malformed agent message");
        }
    }

    async fn route(&self, message: &BusMessage) -> Result<(), ProtocolError> {
        let topics = &self.settings.topics;
        let topic = message.topic.as_str();

        if topic == topics.client_advertise() {
            let response: AdvertiseResponse = decode(&message.payload)?;
            tracing::info!(
                agent_id = %response.agent_id,
                name = %response.payload.name,
                models = ?response.payload.models,
                "Agent registered"
            );
            self.state
                .write()
                .await
                .register(response.agent_id, response.payload);
        } else if let Some(agent) = FlotillaTopics::trailing_segment(&topics.heartbeat_filter(), topic) {
            let heartbeat: HeartbeatMessage = decode(&message.payload)?;
            if heartbeat.agent_id.as_str() != agent {
                tracing::debug!(topic_agent = agent, agent_id = %heartbeat.agent_id, "Heartbeat id differs from topic");
            }
            self.state.write().await.liveness.mark_seen(&AgentId::new(agent));
        } else if let Some(agent) = FlotillaTopics::trailing_segment(&topics.status_filter(), topic) {
            let status: StatusMessage = decode(&message.payload)?;
            tracing::info!(
                agent_id = agent,
                task_id = ?status.task_id,
                status = ?status.status,
                message = ?status.message,
                "Task status"
            );
            self.state
                .write()
                .await
                .record_status(AgentId::new(agent), status);
        } else if let Some((kind, agent_id)) = topics.parse_result_topic(topic) {
            let result = match kind {
                TaskKind::Benchmark => ReceivedResult::Benchmark {
                    agent_id,
                    result: decode(&message.payload)?,
                },
                TaskKind::Train => ReceivedResult::Train {
                    agent_id,
                    result: decode(&message.payload)?,
                },
                TaskKind::Test => ReceivedResult::Test {
                    agent_id,
                    result: decode(&message.payload)?,
                },
            };
            tracing::info!(task_id = result.task_id(), kind = %kind, "Task result received");
            self.state.write().await.record_result(result);
        } else {
            tracing::debug!(topic, "Unrouted message");
        }
        Ok(())
    }

    /// Registered agents that have gone silent for too long.
    pub async fn unreachable_agents(&self) -> Vec<AgentId> {
        self.state
            .read()
            .await
            .liveness
            .unreachable_at(Utc::now(), self.settings.heartbeat_interval)
    }

    /// Route inbound messages and check liveness once per heartbeat
    /// interval until shutdown or the bus closes.
    pub async fn run(
        &self,
        mut inbound: Inbound,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ControllerError> {
        let mut liveness_tick = tokio::time::interval(self.settings.heartbeat_interval);
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                message = inbound.recv() => match message {
                    Some(message) => self.handle_message(&message).await,
                    None => break,
                },
                _ = liveness_tick.tick() => {
                    for agent_id in self.unreachable_agents().await {
                        tracing::warn!(agent_id = %agent_id, "Agent unreachable");
                    }
                }
            }
        }
        Ok(())
    }
}
