use std::collections::BTreeMap;
use std::time::Duration;

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::types::{unix_timestamp, AgentId, TaskKind, TaskStatus};
use crate::ProtocolError;

/// Free-form metrics reported by the execution engine.
pub type Metrics = serde_json::Map<String, serde_json::Value>;

// ── Handshake ──

/// Controller broadcast inviting agents to register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvertiseBroadcast {
    /// Seconds between heartbeats expected from each agent.
    pub heartbeat_interval: f64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AdvertiseBroadcast {
    pub fn new(heartbeat_interval: f64) -> Self {
        Self {
            heartbeat_interval,
            extra: serde_json::Map::new(),
        }
    }

    /// The announced interval, rejected unless finite and positive.
    pub fn heartbeat_interval(&self) -> Result<Duration, ProtocolError> {
        let secs = self.heartbeat_interval;
        if !secs.is_finite() || secs <= 0.0 {
            return Err(ProtocolError::invalid(
                "heartbeat_interval",
                format!("must be a positive number of seconds, got {secs}"),
            ));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Descriptor an agent publishes when answering an advertisement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvertisePayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: f64,
    pub cluster_id: u32,
    pub hw_info: serde_json::Value,
    pub datasets: serde_json::Value,
    #[serde(default)]
    pub models: Vec<String>,
    pub benchmark_info: serde_json::Value,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// Advertise response. On the wire this is a single-entry object keyed by
/// the agent id: `{"<agent_id>": {"payload": {...}}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvertiseResponse {
    pub agent_id: AgentId,
    pub payload: AdvertisePayload,
}

#[derive(Serialize, Deserialize)]
struct AdvertiseEntry<P> {
    payload: P,
}

impl Serialize for AdvertiseResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(
            self.agent_id.as_str(),
            &AdvertiseEntry {
                payload: &self.payload,
            },
        )?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for AdvertiseResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries: BTreeMap<String, AdvertiseEntry<AdvertisePayload>> =
            BTreeMap::deserialize(deserializer)?;
        if entries.len() != 1 {
            return Err(D::Error::custom(format!(
                "advertise response must carry exactly one agent, got {}",
                entries.len()
            )));
        }
        let (agent_id, entry) = entries
            .into_iter()
            .next()
            .ok_or_else(|| D::Error::custom("empty advertise response"))?;
        Ok(Self {
            agent_id: AgentId::new(agent_id),
            payload: entry.payload,
        })
    }
}

// ── Liveness ──

/// Fire-and-forget liveness signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    #[serde(rename = "id")]
    pub agent_id: AgentId,
    pub timestamp: f64,
}

impl HeartbeatMessage {
    pub fn now(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            timestamp: unix_timestamp(),
        }
    }
}

// ── Commands ──

/// Raw command as received on the wire, before the task kind and its
/// parameters are validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl CommandEnvelope {
    /// Validate the envelope into a typed command.
    pub fn into_command(self) -> Result<CommandMessage, ProtocolError> {
        let task_id = self
            .task_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ProtocolError::invalid("task_id", "missing or empty"))?;
        let kind: TaskKind = self.task.parse()?;
        let params = if self.params.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            self.params
        };
        let assignment = match kind {
            TaskKind::Benchmark => TaskAssignment::Benchmark(parse_params(params)?),
            TaskKind::Train => TaskAssignment::Train(parse_params(params)?),
            TaskKind::Test => TaskAssignment::Test(parse_params(params)?),
        };
        Ok(CommandMessage {
            task_id,
            round_id: self.round_id,
            session_id: self.session_id,
            assignment,
        })
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(
    params: serde_json::Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(params).map_err(|e| ProtocolError::invalid("params", e.to_string()))
}

/// A validated task assignment addressed to one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandMessage {
    pub task_id: String,
    pub round_id: Option<i64>,
    pub session_id: Option<String>,
    pub assignment: TaskAssignment,
}

impl CommandMessage {
    pub fn kind(&self) -> TaskKind {
        self.assignment.kind()
    }

    pub fn to_envelope(&self) -> Result<CommandEnvelope, ProtocolError> {
        let params = match &self.assignment {
            TaskAssignment::Benchmark(p) => serde_json::to_value(p),
            TaskAssignment::Train(p) => serde_json::to_value(p),
            TaskAssignment::Test(p) => serde_json::to_value(p),
        }
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(CommandEnvelope {
            task: self.kind().as_str().to_string(),
            task_id: Some(self.task_id.clone()),
            round_id: self.round_id,
            session_id: self.session_id.clone(),
            params,
        })
    }
}

/// Task-kind-specific parameters, one variant per kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskAssignment {
    Benchmark(BenchmarkParams),
    Train(TrainParams),
    Test(TestParams),
}

impl TaskAssignment {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Benchmark(_) => TaskKind::Benchmark,
            Self::Train(_) => TaskKind::Train,
            Self::Test(_) => TaskKind::Test,
        }
    }

    pub fn model_id(&self) -> &str {
        match self {
            Self::Benchmark(p) => &p.model_id,
            Self::Train(p) => &p.model_id,
            Self::Test(p) => &p.model_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkParams {
    pub model_id: String,
    pub model_class: String,
    #[serde(default)]
    pub model_config: Option<serde_json::Value>,
    pub dataset_id: String,
    pub batch_size: u32,
    pub learning_rate: f64,
    #[serde(default)]
    pub timeout_duration_s: Option<f64>,
    #[serde(default)]
    pub bench_minibatch_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainParams {
    pub model_id: String,
    pub model_class: String,
    #[serde(default)]
    pub model_config: Option<serde_json::Value>,
    pub dataset_id: String,
    pub batch_size: u32,
    pub learning_rate: f64,
    pub num_epochs: u32,
    #[serde(default)]
    pub timeout_duration_s: Option<f64>,
    #[serde(default)]
    pub max_epochs: Option<u32>,
    #[serde(default)]
    pub max_mini_batches: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestParams {
    pub model_id: String,
    pub model_class: String,
    #[serde(default)]
    pub model_config: Option<serde_json::Value>,
    pub dataset_id: String,
    pub batch_size: u32,
}

// ── Status and results ──

/// One transition of a task's lifecycle, published on the status topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_id: Option<i64>,
    #[serde(default)]
    pub task_id: Option<String>,
    pub status: TaskStatus,
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub task_id: String,
    pub model_id: String,
    pub hash: String,
    pub bench_duration_s: f64,
    pub num_mini_batches: u64,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_id: Option<i64>,
    pub task_id: String,
    pub metrics: Metrics,
    /// Updated model weights, base64.
    pub weights_b64: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_id: Option<i64>,
    pub task_id: String,
    pub metrics: Metrics,
    pub timestamp: f64,
}

// ── Model distribution ──

/// Global model snapshot broadcast to every agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalModelBroadcast {
    #[serde(default)]
    pub round_id: Option<i64>,
    #[serde(default)]
    pub weights_b64: Option<String>,
}

/// Packaged model code pushed to agents that lack it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifactPush {
    pub model_id: String,
    /// tar archive (optionally gzip-compressed), base64.
    pub artifact_b64: String,
    /// Optional hex SHA-256 of the decoded archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}
