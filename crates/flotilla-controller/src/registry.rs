//! What the controller knows about its agents and their tasks.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use flotilla_protocol::{
    AdvertisePayload, AgentId, BenchmarkResult, StatusMessage, TaskKind, TaskStatus, TestResult,
    TrainResult,
};

use crate::liveness::LivenessTracker;

#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub agent_id: AgentId,
    pub payload: AdvertisePayload,
    pub registered_at: DateTime<Utc>,
    /// Number of advertise responses received from this agent.
    pub responses: u64,
}

/// A result message together with the agent that sent it.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceivedResult {
    Benchmark {
        agent_id: AgentId,
        result: BenchmarkResult,
    },
    Train {
        agent_id: AgentId,
        result: TrainResult,
    },
    Test {
        agent_id: AgentId,
        result: TestResult,
    },
}

impl ReceivedResult {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Benchmark { result, .. } => &result.task_id,
            Self::Train { result, .. } => &result.task_id,
            Self::Test { result, .. } => &result.task_id,
        }
    }

    pub fn agent_id(&self) -> &AgentId {
        match self {
            Self::Benchmark { agent_id, .. }
            | Self::Train { agent_id, .. }
            | Self::Test { agent_id, .. } => agent_id,
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Benchmark { .. } => TaskKind::Benchmark,
            Self::Train { .. } => TaskKind::Train,
            Self::Test { .. } => TaskKind::Test,
        }
    }
}

fn status_kind(status: TaskStatus) -> Option<TaskKind> {
    match status {
        TaskStatus::BenchmarkStarted | TaskStatus::BenchmarkCompleted => Some(TaskKind::Benchmark),
        TaskStatus::TrainingStarted | TaskStatus::TrainingCompleted => Some(TaskKind::Train),
        TaskStatus::TestStarted | TaskStatus::TestCompleted => Some(TaskKind::Test),
        TaskStatus::Error => None,
    }
}

/// Status reports and result for one task id, in arrival order.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub agent_id: AgentId,
    pub statuses: Vec<StatusMessage>,
    pub result_received: bool,
}

impl TaskRecord {
    pub fn sequence(&self) -> Vec<TaskStatus> {
        self.statuses.iter().map(|s| s.status).collect()
    }

    pub fn terminal(&self) -> Option<&StatusMessage> {
        self.statuses.iter().find(|s| s.status.is_terminal())
    }

    /// True when the reports form a prefix of STARTED, then one terminal
    /// status of the same kind (or ERROR), with nothing after it.
    pub fn is_well_formed(&self) -> bool {
        match self.sequence().as_slice() {
            [] => true,
            [only] => only.is_started() || *only == TaskStatus::Error,
            [first, second] => {
                first.is_started()
                    && second.is_terminal()
                    && (*second == TaskStatus::Error || status_kind(*first) == status_kind(*second))
            }
            _ => false,
        }
    }
}

/// Shared controller state.
#[derive(Debug)]
pub struct ControllerState {
    pub agents: BTreeMap<AgentId, AgentRecord>,
    pub liveness: LivenessTracker,
    pub tasks: HashMap<String, TaskRecord>,
    /// ERROR reports that could not be tied to a task id.
    pub orphan_statuses: Vec<(AgentId, StatusMessage)>,
    pub results: Vec<ReceivedResult>,
}

impl ControllerState {
    pub fn new(missed_intervals: u32) -> Self {
        Self {
            agents: BTreeMap::new(),
            liveness: LivenessTracker::new(missed_intervals),
            tasks: HashMap::new(),
            orphan_statuses: Vec::new(),
            results: Vec::new(),
        }
    }

    pub fn register(&mut self, agent_id: AgentId, payload: AdvertisePayload) -> &AgentRecord {
        self.liveness.mark_seen(&agent_id);
        let record = self
            .agents
            .entry(agent_id.clone())
            .or_insert_with(|| AgentRecord {
                agent_id,
                payload: payload.clone(),
                registered_at: Utc::now(),
                responses: 0,
            });
        record.payload = payload;
        record.responses += 1;
        record
    }

    pub fn record_status(&mut self, agent_id: AgentId, status: StatusMessage) {
        match status.task_id.clone() {
            Some(task_id) => {
                self.tasks
                    .entry(task_id)
                    .or_insert_with(|| TaskRecord {
                        agent_id,
                        statuses: Vec::new(),
                        result_received: false,
                    })
                    .statuses
                    .push(status);
            }
            None => self.orphan_statuses.push((agent_id, status)),
        }
    }

    pub fn record_result(&mut self, result: ReceivedResult) {
        let task_id = result.task_id().to_string();
        let agent_id = result.agent_id().clone();
        self.tasks
            .entry(task_id)
            .or_insert_with(|| TaskRecord {
                agent_id,
                statuses: Vec::new(),
                result_received: false,
            })
            .result_received = true;
        self.results.push(result);
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskRecord> {
        self.tasks.get(task_id)
    }

    pub fn results_for(&self, task_id: &str) -> Vec<&ReceivedResult> {
        self.results.iter().filter(|r| r.task_id() == task_id).collect()
    }
}

impl Default for ControllerState {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(task_id: &str, status: TaskStatus) -> StatusMessage {
        StatusMessage {
            session_id: None,
            round_id: None,
            task_id: Some(task_id.into()),
            status,
            timestamp: 0.0,
            message: None,
        }
    }

    fn record(seq: &[TaskStatus]) -> TaskRecord {
        TaskRecord {
            agent_id: AgentId::new("a"),
            statuses: seq.iter().map(|s| status("t", *s)).collect(),
            result_received: false,
        }
    }

    #[test]
    fn test_well_formed_sequences() {
        use TaskStatus::*;
        assert!(record(&[]).is_well_formed());
        assert!(record(&[TrainingStarted]).is_well_formed());
        assert!(record(&[Error]).is_well_formed());
        assert!(record(&[TrainingStarted, TrainingCompleted]).is_well_formed());
        assert!(record(&[BenchmarkStarted, Error]).is_well_formed());
    }

    #[test]
    fn test_malformed_sequences() {
        use TaskStatus::*;
        assert!(!record(&[TestCompleted]).is_well_formed());
        assert!(!record(&[TrainingCompleted]).is_well_formed());
        assert!(!record(&[TrainingStarted, TestCompleted]).is_well_formed());
        assert!(!record(&[TestStarted, TestStarted]).is_well_formed());
        assert!(!record(&[TestCompleted, Error]).is_well_formed());
        assert!(!record(&[TestStarted, TestCompleted, Error]).is_well_formed());
    }

    #[test]
    fn test_status_without_task_id_is_orphaned() {
        let mut state = ControllerState::default();
        let mut s = status("x", TaskStatus::Error);
        s.task_id = None;
        state.record_status(AgentId::new("a"), s);
        assert!(state.tasks.is_empty());
        assert_eq!(state.orphan_statuses.len(), 1);
    }
}
