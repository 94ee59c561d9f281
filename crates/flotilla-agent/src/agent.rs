//! Agent runtime: wires the handshake, heartbeat, dispatcher and model
//! distribution onto one bus connection.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use flotilla_bus::{topic_matches, BusMessage, Inbound, MessageBus};
use flotilla_protocol::FlotillaTopics;
use tokio::sync::watch;

use crate::artifact::ModelCache;
use crate::config::AgentConfig;
use crate::descriptor::AgentDescriptor;
use crate::dispatcher::CommandDispatcher;
use crate::distribution::ModelDistribution;
use crate::engine::ExecutionEngine;
use crate::error::AgentError;
use crate::handshake::Handshake;
use crate::heartbeat::HeartbeatMonitor;
use crate::state::AgentState;
use crate::tracker::DEFAULT_DUPLICATE_WINDOW_SECS;

/// Runtime knobs that are not part of the agent's identity.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub topics: FlotillaTopics,
    pub work_dir: PathBuf,
    pub handshake_timeout: Option<Duration>,
    pub duplicate_window: Duration,
}

impl AgentSettings {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            topics: FlotillaTopics::default(),
            work_dir: work_dir.into(),
            handshake_timeout: None,
            duplicate_window: Duration::from_secs(DEFAULT_DUPLICATE_WINDOW_SECS),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            topics: config.topics(),
            work_dir: config.work_dir(),
            handshake_timeout: config.handshake_timeout(),
            duplicate_window: config.duplicate_window(),
        }
    }
}

/// The agent process.
///
/// Lifecycle: subscribe to advertisements, wait for admission, subscribe to
/// commands and model topics, start the heartbeat, then route inbound
/// messages until shutdown. Commands are executed one at a time on the
/// routing loop; the heartbeat runs on its own task.
pub struct FlotillaAgent {
    descriptor: Arc<AgentDescriptor>,
    settings: AgentSettings,
    bus: Arc<dyn MessageBus>,
    inbound: Option<Inbound>,
    engine: Arc<dyn ExecutionEngine>,
    state: AgentState,
}

impl FlotillaAgent {
    pub fn new(
        descriptor: AgentDescriptor,
        settings: AgentSettings,
        bus: Arc<dyn MessageBus>,
        inbound: Inbound,
        engine: Arc<dyn ExecutionEngine>,
    ) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            settings,
            bus,
            inbound: Some(inbound),
            engine,
            state: AgentState::default(),
        }
    }

    /// Handles to the membership and snapshot state, for observers.
    pub fn shared_state(&self) -> AgentState {
        self.state.clone()
    }

    pub fn model_cache(&self) -> ModelCache {
        ModelCache::under(&self.settings.work_dir)
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), AgentError> {
        let mut inbound = self.inbound.take().ok_or(AgentError::InboundConsumed)?;
        let topics = self.settings.topics.clone();
        let agent_id = self.descriptor.id.clone();
        let cache = self.model_cache();

        let handshake = Handshake::new(
            Arc::clone(&self.descriptor),
            topics.clone(),
            Arc::clone(&self.bus),
            self.state.membership.clone(),
            cache.clone(),
        );
        handshake.subscribe().await?;
        let membership = handshake
            .complete(&mut inbound, &mut shutdown, self.settings.handshake_timeout)
            .await?;
        tracing::info!(
            agent_id = %agent_id,
            heartbeat_interval_s = membership.heartbeat_interval.as_secs_f64(),
            "Admitted to session"
        );

        let command_topic = topics.command(&agent_id);
        let global_topic = topics.model_global();
        let artifact_filter = topics.model_artifact_filter();
        let advertise_topic = topics.server_advertise();
        for filter in [&command_topic, &global_topic, &artifact_filter] {
            self.bus.subscribe(filter).await?;
        }

        let heartbeat = HeartbeatMonitor::new(
            agent_id.clone(),
            &topics,
            Arc::clone(&self.bus),
            self.state.membership.clone(),
        )
        .spawn(shutdown.clone());

        let mut dispatcher = CommandDispatcher::new(
            agent_id.clone(),
            topics.clone(),
            Arc::clone(&self.bus),
            Arc::clone(&self.engine),
            self.state.snapshots.clone(),
            cache.clone(),
            self.settings.duplicate_window,
        );
        let distribution = ModelDistribution::new(topics.clone(), self.state.snapshots.clone(), cache);

        tracing::info!(agent_id = %agent_id, "Agent is running");

        loop {
            if *shutdown.borrow() {
                break;
            }
            let message: BusMessage = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                message = inbound.recv() => match message {
                    Some(message) => message,
                    None => {
                        tracing::warn!(agent_id = %agent_id, "Bus connection closed");
                        break;
                    }
                },
            };

            if message.topic == command_topic {
                dispatcher.handle(&message.payload).await;
            } else if message.topic == global_topic {
                if let Err(e) = distribution.on_global_model(&message.payload).await {
                    tracing::warn!(error = %e, "Dropping malformed global model broadcast");
                }
            } else if topic_matches(&artifact_filter, &message.topic) {
                if let Err(e) = distribution.on_artifact(&message.topic, &message.payload).await {
                    tracing::error!(topic = %message.topic, error = %e, "Model artifact rejected");
                }
            } else if message.topic == advertise_topic {
                if let Err(e) = handshake.respond(&message.payload).await {
                    tracing::warn!(error = %e, "Could not answer re-advertisement");
                }
            } else {
                tracing::debug!(topic = %message.topic, "Unrouted message");
            }
        }

        if *shutdown.borrow() {
            let _ = heartbeat.await;
        } else {
            heartbeat.abort();
        }
        tracing::info!(agent_id = %agent_id, "Agent stopped");
        Ok(())
    }
}
