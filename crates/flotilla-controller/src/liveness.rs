use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flotilla_protocol::AgentId;

/// Last heartbeat seen per agent. An agent is unreachable once it has
/// been silent for more than `missed_intervals` heartbeat intervals.
#[derive(Debug, Clone)]
pub struct LivenessTracker {
    missed_intervals: u32,
    last_seen: HashMap<AgentId, DateTime<Utc>>,
}

impl LivenessTracker {
    pub fn new(missed_intervals: u32) -> Self {
        Self {
            missed_intervals: missed_intervals.max(1),
            last_seen: HashMap::new(),
        }
    }

    pub fn mark_seen(&mut self, agent_id: &AgentId) {
        self.mark_seen_at(agent_id, Utc::now());
    }

    pub fn mark_seen_at(&mut self, agent_id: &AgentId, at: DateTime<Utc>) {
        if agent_id.as_str().trim().is_empty() {
            return;
        }
        let entry = self.last_seen.entry(agent_id.clone()).or_insert(at);
        if at > *entry {
            *entry = at;
        }
    }

    pub fn last_seen(&self, agent_id: &AgentId) -> Option<DateTime<Utc>> {
        self.last_seen.get(agent_id).copied()
    }

    fn max_staleness(&self, interval: Duration) -> Duration {
        interval.saturating_mul(self.missed_intervals)
    }

    fn is_stale(&self, seen: DateTime<Utc>, now: DateTime<Utc>, interval: Duration) -> bool {
        now.signed_duration_since(seen)
            .to_std()
            .map(|age| age > self.max_staleness(interval))
            .unwrap_or(false)
    }

    /// Agents whose last heartbeat is older than the allowed staleness,
    /// sorted by id.
    pub fn unreachable_at(&self, now: DateTime<Utc>, interval: Duration) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| self.is_stale(**seen, now, interval))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn reachable_at(&self, now: DateTime<Utc>, interval: Duration) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| !self.is_stale(**seen, now, interval))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn forget(&mut self, agent_id: &AgentId) {
        self.last_seen.remove(agent_id);
    }
}

impl Default for LivenessTracker {
    fn default() -> Self {
        Self::new(3)
    }
}
