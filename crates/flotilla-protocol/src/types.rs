use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Stable identifier of an agent for its whole process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The closed set of work a controller may assign to an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    Benchmark,
    Train,
    Test,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Benchmark => "BENCHMARK",
            Self::Train => "TRAIN",
            Self::Test => "TEST",
        }
    }

    /// Path segment used in the result topic for this kind.
    pub fn result_segment(&self) -> &'static str {
        match self {
            Self::Benchmark => "benchmark",
            Self::Train => "train",
            Self::Test => "test",
        }
    }

    pub fn started_status(&self) -> TaskStatus {
        match self {
            Self::Benchmark => TaskStatus::BenchmarkStarted,
            Self::Train => TaskStatus::TrainingStarted,
            Self::Test => TaskStatus::TestStarted,
        }
    }

    pub fn completed_status(&self) -> TaskStatus {
        match self {
            Self::Benchmark => TaskStatus::BenchmarkCompleted,
            Self::Train => TaskStatus::TrainingCompleted,
            Self::Test => TaskStatus::TestCompleted,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BENCHMARK" => Ok(Self::Benchmark),
            "TRAIN" => Ok(Self::Train),
            "TEST" => Ok(Self::Test),
            other => Err(ProtocolError::UnknownTaskKind(other.to_string())),
        }
    }
}

/// Status values reported on an agent's status topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    BenchmarkStarted,
    BenchmarkCompleted,
    TrainingStarted,
    TrainingCompleted,
    TestStarted,
    TestCompleted,
    Error,
}

impl TaskStatus {
    pub fn is_started(&self) -> bool {
        matches!(
            self,
            Self::BenchmarkStarted | Self::TrainingStarted | Self::TestStarted
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_started()
    }
}

/// Seconds since the Unix epoch with sub-second precision, as carried in
/// every envelope's `timestamp` field.
pub fn unix_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
