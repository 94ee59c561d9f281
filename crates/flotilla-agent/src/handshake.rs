//! Session admission.
//!
//! The agent listens on the advertise topic and answers the first valid
//! advertisement with its descriptor. Nothing else (heartbeats, command
//! handling) starts until that answer has been published. Later
//! advertisements are answered the same way and may change the heartbeat
//! interval.

use std::sync::Arc;
use std::time::Duration;

use flotilla_bus::{Inbound, MessageBus};
use flotilla_protocol::{decode, encode, AdvertiseBroadcast, AdvertiseResponse, FlotillaTopics};
use tokio::sync::watch;

use crate::artifact::ModelCache;
use crate::descriptor::AgentDescriptor;
use crate::error::HandshakeError;
use crate::state::{MembershipState, SessionMembership};

pub struct Handshake {
    descriptor: Arc<AgentDescriptor>,
    topics: FlotillaTopics,
    bus: Arc<dyn MessageBus>,
    membership: MembershipState,
    cache: ModelCache,
}

impl Handshake {
    pub fn new(
        descriptor: Arc<AgentDescriptor>,
        topics: FlotillaTopics,
        bus: Arc<dyn MessageBus>,
        membership: MembershipState,
        cache: ModelCache,
    ) -> Self {
        Self {
            descriptor,
            topics,
            bus,
            membership,
            cache,
        }
    }

    pub async fn subscribe(&self) -> Result<(), HandshakeError> {
        self.bus.subscribe(&self.topics.server_advertise()).await?;
        Ok(())
    }

    /// Answer one advertisement. The announced interval is stored before
    /// the response is published.
    pub async fn respond(&self, payload: &[u8]) -> Result<SessionMembership, HandshakeError> {
        let broadcast: AdvertiseBroadcast = decode(payload)?;
        let interval = broadcast.heartbeat_interval()?;
        let membership = self.membership.record_interval(interval).await;

        let response = AdvertiseResponse {
            agent_id: self.descriptor.id.clone(),
            payload: self.descriptor.advertise_payload(self.cache.list_models()),
        };
        self.bus
            .publish(&self.topics.client_advertise(), encode(&response)?)
            .await?;

        tracing::info!(
            agent_id = %self.descriptor.id,
            heartbeat_interval_s = interval.as_secs_f64(),
            advertisements = membership.advertisements,
            "Answered advertisement"
        );
        Ok(membership)
    }

    /// Block until an advertisement has been answered, shutdown is
    /// requested, the bus closes, or `timeout` (when set) elapses.
    pub async fn complete(
        &self,
        inbound: &mut Inbound,
        shutdown: &mut watch::Receiver<bool>,
        timeout: Option<Duration>,
    ) -> Result<SessionMembership, HandshakeError> {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.wait(inbound, shutdown))
                .await
                .map_err(|_| HandshakeError::Timeout(limit))?,
            None => self.wait(inbound, shutdown).await,
        }
    }

    async fn wait(
        &self,
        inbound: &mut Inbound,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionMembership, HandshakeError> {
        let advertise_topic = self.topics.server_advertise();
        tracing::info!(topic = %advertise_topic, "Waiting for controller advertisement");
        loop {
            if *shutdown.borrow() {
                return Err(HandshakeError::ShutDown);
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Err(HandshakeError::ShutDown);
                    }
                }
                message = inbound.recv() => {
                    let Some(message) = message else {
                        return Err(HandshakeError::BusClosed);
                    };
                    if message.topic != advertise_topic {
                        tracing::debug!(topic = %message.topic, "Dropping message received before admission");
                        continue;
                    }
                    match self.respond(&message.payload).await {
                        Ok(membership) => return Ok(membership),
                        Err(HandshakeError::Transport(e)) => {
                            tracing::warn!(error = %e, "Advertise response not delivered; still waiting for admission");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Ignoring malformed advertisement");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use flotilla_bus::MemoryBroker;
    use flotilla_protocol::AgentId;

    async fn setup(
        broker: &MemoryBroker,
    ) -> (Handshake, Inbound, MembershipState, tempfile::TempDir) {
        let (client, inbound) = broker.connect("agent-a1").await;
        let mut config = AgentConfig::default();
        config.agent.id = Some("a1".into());
        let dir = tempfile::tempdir().unwrap();
        let membership = MembershipState::default();
        let handshake = Handshake::new(
            Arc::new(AgentDescriptor::from_config(&config)),
            FlotillaTopics::default(),
            Arc::new(client),
            membership.clone(),
            ModelCache::under(dir.path()),
        );
        handshake.subscribe().await.unwrap();
        (handshake, inbound, membership, dir)
    }

    #[tokio::test]
    async fn test_first_valid_advertisement_admits() {
        let broker = MemoryBroker::new();
        let (handshake, mut inbound, membership, _dir) = setup(&broker).await;
        let (controller, _rx) = broker.connect("controller").await;
        controller
            .publish("flotilla/server/advertise", br#"{"heartbeat_interval": "soon"}"#.to_vec())
            .await
            .unwrap();
        controller
            .publish("flotilla/server/advertise", br#"{"heartbeat_interval": 2}"#.to_vec())
            .await
            .unwrap();

        let (_tx, mut shutdown) = watch::channel(false);
        let admitted = handshake
            .complete(&mut inbound, &mut shutdown, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(admitted.heartbeat_interval, Duration::from_secs(2));
        assert_eq!(membership.current().await, Some(admitted));

        let responses = broker.published_on("flotilla/client/advertise").await;
        assert_eq!(responses.len(), 1);
        let response: AdvertiseResponse = decode(&responses[0].payload).unwrap();
        assert_eq!(response.agent_id, AgentId::new("a1"));
    }

    #[tokio::test]
    async fn test_failed_response_keeps_agent_waiting() {
        let broker = MemoryBroker::new();
        let (handshake, mut inbound, _membership, _dir) = setup(&broker).await;
        let (controller, _rx) = broker.connect("controller").await;
        broker.inject_publish_fault("flotilla/client/advertise").await;
        controller
            .publish("flotilla/server/advertise", br#"{"heartbeat_interval": 1}"#.to_vec())
            .await
            .unwrap();

        let (_tx, mut shutdown) = watch::channel(false);
        let err = handshake
            .complete(&mut inbound, &mut shutdown, Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_wait() {
        let broker = MemoryBroker::new();
        let (handshake, mut inbound, _membership, _dir) = setup(&broker).await;
        let (tx, mut shutdown) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(true);
        });
        let err = handshake
            .complete(&mut inbound, &mut shutdown, None)
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::ShutDown));
    }
}
