use std::sync::Arc;

use flotilla_bus::MessageBus;
use flotilla_protocol::{encode, AgentId, FlotillaTopics, HeartbeatMessage};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::HeartbeatError;
use crate::state::MembershipState;

/// Periodic liveness publisher. Runs on its own task so a long engine call
/// in the dispatcher never delays a beat.
pub struct HeartbeatMonitor {
    agent_id: AgentId,
    topic: String,
    bus: Arc<dyn MessageBus>,
    membership: MembershipState,
}

impl HeartbeatMonitor {
    pub fn new(
        agent_id: AgentId,
        topics: &FlotillaTopics,
        bus: Arc<dyn MessageBus>,
        membership: MembershipState,
    ) -> Self {
        let topic = topics.heartbeat(&agent_id);
        Self {
            agent_id,
            topic,
            bus,
            membership,
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<u64> {
        tokio::spawn(self.run(shutdown))
    }

    /// Publish, then sleep for the current interval, until shutdown.
    /// The interval is re-read every cycle. Returns the number of beats
    /// successfully published.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut sent = 0u64;
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.beat().await {
                Ok(()) => sent += 1,
                Err(e) => tracing::warn!(agent_id = %self.agent_id, error = %e, "Heartbeat not published"),
            }

            let interval = self.membership.heartbeat_interval().await;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::debug!(agent_id = %self.agent_id, sent, "Heartbeat stopped");
        sent
    }

    async fn beat(&self) -> Result<(), HeartbeatError> {
        let payload = encode(&HeartbeatMessage::now(self.agent_id.clone()))?;
        self.bus.publish(&self.topic, payload).await?;
        Ok(())
    }
}
