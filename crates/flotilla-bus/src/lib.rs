//! Flotilla message bus client.
//!
//! The protocol layer only relies on a small contract from the broker:
//! ordered, at-least-once (QoS 1) delivery per topic, MQTT-style topic
//! filters, and a single inbound stream per client. [`MessageBus`] is that
//! contract; [`mqtt`] implements it over a real broker and [`memory`]
//! implements it in-process for tests and single-host runs.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

pub mod error;
pub mod filter;
pub mod memory;
pub mod mqtt;
pub mod transport;

pub use error::BusError;
pub use filter::{topic_matches, validate_filter};
pub use memory::{MemoryBroker, MemoryClient, PublishedMessage};
pub use mqtt::{MqttHandle, MqttHost};
pub use transport::MqttTransportConfig;

/// A message delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Inbound stream handed out when a client connects. Every message whose
/// topic matches one of the client's subscriptions arrives here, in
/// per-topic publish order.
pub type Inbound = mpsc::UnboundedReceiver<BusMessage>;

pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BusError>> + Send + 'a>>;

/// Client side of the broker contract. All publishes and subscriptions use
/// at-least-once delivery.
pub trait MessageBus: Send + Sync {
    fn publish<'a>(&'a self, topic: &'a str, payload: Vec<u8>) -> BusFuture<'a, ()>;

    fn subscribe<'a>(&'a self, filter: &'a str) -> BusFuture<'a, ()>;
}
