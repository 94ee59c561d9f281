//! MQTT implementation of the bus contract on top of `rumqttc`.
//!
//! [`MqttHost::connect`] returns three parts, mirroring the split between a
//! transport loop and the handles used to drive it:
//! - [`MqttHost`]: owns the event loop; spawn [`MqttHost::run`]
//! - [`MqttHandle`]: cloneable publisher/subscriber
//! - [`Inbound`]: every received publish, in arrival order

use std::sync::Arc;

use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use tokio::sync::{mpsc, watch, Mutex};

use crate::filter::validate_filter;
use crate::transport::MqttTransportConfig;
use crate::{BusError, BusFuture, BusMessage, Inbound, MessageBus};

/// Owns the MQTT event loop. Must be running for publishes to leave the
/// process and for inbound messages to arrive.
pub struct MqttHost {
    eventloop: EventLoop,
    client: AsyncClient,
    filters: Arc<Mutex<Vec<String>>>,
    inbound_tx: mpsc::UnboundedSender<BusMessage>,
    config: MqttTransportConfig,
}

/// Cloneable handle used to publish and subscribe.
#[derive(Clone)]
pub struct MqttHandle {
    client: AsyncClient,
    filters: Arc<Mutex<Vec<String>>>,
}

impl MqttHost {
    pub fn connect(config: MqttTransportConfig, client_id: &str) -> (MqttHost, MqttHandle, Inbound) {
        let options = config.mqtt_options(client_id);
        let (client, eventloop) = AsyncClient::new(options, config.request_capacity);
        // Unbounded: the event loop must keep polling while consumers are busy.
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let filters = Arc::new(Mutex::new(Vec::new()));
        tracing::info!(
            host = %config.host,
            port = config.port,
            client_id = %client_id,
            "MQTT client configured"
        );
        let host = MqttHost {
            eventloop,
            client: client.clone(),
            filters: Arc::clone(&filters),
            inbound_tx,
            config,
        };
        (host, MqttHandle { client, filters }, inbound_rx)
    }

    /// Drive the event loop until `shutdown` is raised or every inbound
    /// receiver is gone.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), BusError> {
        let MqttHost {
            mut eventloop,
            client,
            filters,
            inbound_tx,
            config,
        } = self;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = BusMessage {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                        };
                        if inbound_tx.send(message).is_err() {
                            tracing::info!("Inbound receiver dropped, stopping MQTT loop");
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        tracing::info!(
                            session_present = ack.session_present,
                            "Connected to MQTT broker"
                        );
                        if !ack.session_present {
                            resubscribe(&client, &filters).await;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            host = %config.host,
                            port = config.port,
                            "MQTT connection error, retrying"
                        );
                        tokio::time::sleep(config.reconnect_delay).await;
                    }
                },
            }
        }
        if let Err(e) = client.try_disconnect() {
            tracing::debug!(error = %e, "MQTT disconnect request failed");
        }
        Ok(())
    }
}

/// Restore subscriptions after the broker lost our session. Uses the
/// non-blocking request path since this runs on the event loop itself.
async fn resubscribe(client: &AsyncClient, filters: &Mutex<Vec<String>>) {
    let filters = filters.lock().await.clone();
    for filter in filters {
        if let Err(e) = client.try_subscribe(filter.clone(), QoS::AtLeastOnce) {
            tracing::warn!(error = %e, filter = %filter, "Failed to restore subscription");
        }
    }
}

impl MessageBus for MqttHandle {
    fn publish<'a>(&'a self, topic: &'a str, payload: Vec<u8>) -> BusFuture<'a, ()> {
        Box::pin(async move {
            self.client
                .publish(topic, QoS::AtLeastOnce, false, payload)
                .await
                .map_err(|e| BusError::Publish {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                })
        })
    }

    fn subscribe<'a>(&'a self, filter: &'a str) -> BusFuture<'a, ()> {
        Box::pin(async move {
            validate_filter(filter)?;
            self.client
                .subscribe(filter, QoS::AtLeastOnce)
                .await
                .map_err(|e| BusError::Subscribe {
                    filter: filter.to_string(),
                    reason: e.to_string(),
                })?;
            let mut filters = self.filters.lock().await;
            if !filters.iter().any(|f| f == filter) {
                filters.push(filter.to_string());
            }
            Ok(())
        })
    }
}
