//! State shared between the dispatch loop, the heartbeat task and
//! observers. Each cell is an `Arc<RwLock<..>>` so readers never see a
//! half-written value.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flotilla_protocol::DEFAULT_HEARTBEAT_INTERVAL_SECS;
use tokio::sync::RwLock;

/// Session parameters handed to the agent by the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMembership {
    pub heartbeat_interval: Duration,
    pub admitted_at: DateTime<Utc>,
    /// Number of advertisements answered, including the first.
    pub advertisements: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MembershipState {
    inner: Arc<RwLock<Option<SessionMembership>>>,
}

impl MembershipState {
    /// Record the interval announced by an advertisement. The first call
    /// creates the membership, later calls overwrite the interval.
    pub async fn record_interval(&self, interval: Duration) -> SessionMembership {
        let mut guard = self.inner.write().await;
        let membership = match guard.take() {
            Some(mut existing) => {
                existing.heartbeat_interval = interval;
                existing.advertisements += 1;
                existing
            }
            None => SessionMembership {
                heartbeat_interval: interval,
                admitted_at: Utc::now(),
                advertisements: 1,
            },
        };
        *guard = Some(membership.clone());
        membership
    }

    pub async fn current(&self) -> Option<SessionMembership> {
        self.inner.read().await.clone()
    }

    /// The interval the heartbeat task should honour right now.
    pub async fn heartbeat_interval(&self) -> Duration {
        self.inner
            .read()
            .await
            .as_ref()
            .map(|m| m.heartbeat_interval)
            .unwrap_or_else(|| Duration::from_secs_f64(DEFAULT_HEARTBEAT_INTERVAL_SECS))
    }
}

/// Latest global model received from the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalModelSnapshot {
    pub round_id: Option<i64>,
    pub weights: Option<Vec<u8>>,
    pub received_at: DateTime<Utc>,
}

/// Single-slot snapshot store. Every broadcast replaces the previous
/// snapshot wholesale, regardless of its round id.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    inner: Arc<RwLock<Option<Arc<GlobalModelSnapshot>>>>,
}

impl SnapshotStore {
    pub async fn replace(&self, snapshot: GlobalModelSnapshot) {
        *self.inner.write().await = Some(Arc::new(snapshot));
    }

    pub async fn current(&self) -> Option<Arc<GlobalModelSnapshot>> {
        self.inner.read().await.clone()
    }

    pub async fn weights(&self) -> Option<Vec<u8>> {
        self.current().await.and_then(|s| s.weights.clone())
    }
}

/// Handles to every piece of shared agent state.
#[derive(Debug, Clone, Default)]
pub struct AgentState {
    pub membership: MembershipState,
    pub snapshots: SnapshotStore,
}
