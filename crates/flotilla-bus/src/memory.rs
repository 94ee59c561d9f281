//! In-process broker.
//!
//! Routes publishes to every connected client with a matching subscription
//! and keeps a log of everything published, which tests use to observe the
//! protocol from the outside. Faults can be injected per topic filter to
//! exercise publish-failure paths.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex};

use crate::filter::{topic_matches, validate_filter};
use crate::{BusError, BusFuture, BusMessage, Inbound, MessageBus};

/// A message as recorded by the broker's publish log.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub client_id: String,
    pub topic: String,
    pub payload: Vec<u8>,
    pub at: Instant,
}

struct Session {
    client_id: String,
    filters: Vec<String>,
    tx: mpsc::UnboundedSender<BusMessage>,
}

#[derive(Default)]
struct BrokerInner {
    sessions: Vec<Session>,
    log: Vec<PublishedMessage>,
    faults: Vec<String>,
}

/// Shared handle to an in-process broker. Cloning shares the same broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<BrokerInner>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client session and return its bus handle and inbound stream.
    pub async fn connect(&self, client_id: impl Into<String>) -> (MemoryClient, Inbound) {
        let client_id = client_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().await.sessions.push(Session {
            client_id: client_id.clone(),
            filters: Vec::new(),
            tx,
        });
        tracing::debug!(client_id = %client_id, "memory bus client connected");
        (
            MemoryClient {
                client_id,
                broker: self.clone(),
            },
            rx,
        )
    }

    /// Make every publish whose topic matches `filter` fail until cleared.
    pub async fn inject_publish_fault(&self, filter: impl Into<String>) {
        self.inner.lock().await.faults.push(filter.into());
    }

    pub async fn clear_faults(&self) {
        self.inner.lock().await.faults.clear();
    }

    /// Everything published so far, in publish order.
    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.inner.lock().await.log.clone()
    }

    /// Published messages whose topic matches `filter`.
    pub async fn published_on(&self, filter: &str) -> Vec<PublishedMessage> {
        self.inner
            .lock()
            .await
            .log
            .iter()
            .filter(|m| topic_matches(filter, &m.topic))
            .cloned()
            .collect()
    }

    /// Poll the publish log until at least `count` messages match `filter`
    /// or `timeout` elapses. Returns whatever matched.
    pub async fn wait_for(
        &self,
        filter: &str,
        count: usize,
        timeout: Duration,
    ) -> Vec<PublishedMessage> {
        let deadline = Instant::now() + timeout;
        loop {
            let matched = self.published_on(filter).await;
            if matched.len() >= count || Instant::now() >= deadline {
                return matched;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn route(&self, client_id: &str, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let mut inner = self.inner.lock().await;
        if inner.faults.iter().any(|f| topic_matches(f, topic)) {
            return Err(BusError::Publish {
                topic: topic.to_string(),
                reason: "injected fault".to_string(),
            });
        }
        inner.log.push(PublishedMessage {
            client_id: client_id.to_string(),
            topic: topic.to_string(),
            payload: payload.clone(),
            at: Instant::now(),
        });
        inner.sessions.retain(|session| {
            if !session.filters.iter().any(|f| topic_matches(f, topic)) {
                return true;
            }
            session
                .tx
                .send(BusMessage {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                })
                .is_ok()
        });
        Ok(())
    }

    async fn add_filter(&self, client_id: &str, filter: &str) -> Result<(), BusError> {
        validate_filter(filter)?;
        let mut inner = self.inner.lock().await;
        let session = inner
            .sessions
            .iter_mut()
            .find(|s| s.client_id == client_id)
            .ok_or(BusError::Closed)?;
        if !session.filters.iter().any(|f| f == filter) {
            session.filters.push(filter.to_string());
        }
        Ok(())
    }
}

/// One client's view of a [`MemoryBroker`].
#[derive(Clone)]
pub struct MemoryClient {
    client_id: String,
    broker: MemoryBroker,
}

impl MemoryClient {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl MessageBus for MemoryClient {
    fn publish<'a>(&'a self, topic: &'a str, payload: Vec<u8>) -> BusFuture<'a, ()> {
        Box::pin(async move { self.broker.route(&self.client_id, topic, payload).await })
    }

    fn subscribe<'a>(&'a self, filter: &'a str) -> BusFuture<'a, ()> {
        Box::pin(async move { self.broker.add_filter(&self.client_id, filter).await })
    }
}
