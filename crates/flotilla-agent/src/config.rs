//! Agent configuration, loaded from TOML.
//!
//! Every section is optional; missing keys fall back to the defaults
//! below. Command-line flags override individual keys after loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use flotilla_bus::MqttTransportConfig;
use flotilla_protocol::{AgentId, FlotillaTopics, DEFAULT_BROKER_PORT, TOPIC_PREFIX};
use serde::{Deserialize, Serialize};

use crate::descriptor::NetworkMode;
use crate::tracker::DEFAULT_DUPLICATE_WINDOW_SECS;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("agent id '{0}' is not a single topic level")]
    InvalidAgentId(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub agent: AgentSection,
    pub bus: BusSection,
    pub handshake: HandshakeSection,
    pub dispatch: DispatchSection,
    pub engine: EngineSection,
    /// Dataset catalog advertised verbatim to the controller.
    #[serde(default = "empty_table")]
    pub datasets: serde_json::Value,
    /// Benchmark capability info advertised verbatim to the controller.
    #[serde(default = "empty_table")]
    pub benchmark_info: serde_json::Value,
    /// Extra hardware facts merged over the probed ones.
    #[serde(default = "empty_table")]
    pub hardware: serde_json::Value,
}

fn empty_table() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent: AgentSection::default(),
            bus: BusSection::default(),
            handshake: HandshakeSection::default(),
            dispatch: DispatchSection::default(),
            engine: EngineSection::default(),
            datasets: empty_table(),
            benchmark_info: empty_table(),
            hardware: empty_table(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// Stable agent id. Generated once at startup when absent.
    pub id: Option<String>,
    pub name: String,
    pub kind: String,
    pub cluster_id: u32,
    /// Root for the model cache. Defaults to the platform cache dir.
    pub work_dir: Option<PathBuf>,
    pub network_mode: NetworkMode,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            id: None,
            name: "flotilla-agent".to_string(),
            kind: "edge".to_string(),
            cluster_id: flotilla_protocol::DEFAULT_CLUSTER_ID,
            work_dir: None,
            network_mode: NetworkMode::Direct,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSection {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
    pub client_id_prefix: String,
    pub topic_prefix: String,
    pub request_capacity: usize,
    pub reconnect_delay_ms: u64,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_BROKER_PORT,
            keep_alive_secs: 60,
            client_id_prefix: "flotilla-agent-".to_string(),
            topic_prefix: TOPIC_PREFIX.to_string(),
            request_capacity: 64,
            reconnect_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeSection {
    /// Give up waiting for an advertisement after this many seconds.
    /// Absent means wait forever.
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    pub duplicate_window_secs: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            duplicate_window_secs: DEFAULT_DUPLICATE_WINDOW_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            command: "python3".to_string(),
            args: vec!["-m".to_string(), "flotilla_engine".to_string()],
            working_dir: None,
        }
    }
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Pin the agent id so it stays stable for the rest of the process.
    /// The id is used verbatim as a topic level.
    pub fn finalize(mut self) -> Result<Self, ConfigError> {
        match self.agent.id.as_deref() {
            Some(id) if !id.trim().is_empty() => {
                if !FlotillaTopics::is_topic_segment(id) {
                    return Err(ConfigError::InvalidAgentId(id.to_string()));
                }
            }
            _ => self.agent.id = Some(uuid::Uuid::new_v4().to_string()),
        }
        Ok(self)
    }

    pub fn agent_id(&self) -> AgentId {
        AgentId::new(self.agent.id.clone().unwrap_or_default())
    }

    pub fn work_dir(&self) -> PathBuf {
        self.agent.work_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("flotilla")
        })
    }

    pub fn topics(&self) -> FlotillaTopics {
        FlotillaTopics::new(self.bus.topic_prefix.clone())
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake.timeout_secs.map(Duration::from_secs)
    }

    pub fn duplicate_window(&self) -> Duration {
        Duration::from_secs(self.dispatch.duplicate_window_secs)
    }

    pub fn mqtt_client_id(&self) -> String {
        format!("{}{}", self.bus.client_id_prefix, self.agent_id())
    }

    pub fn transport(&self) -> MqttTransportConfig {
        MqttTransportConfig {
            host: self.bus.host.clone(),
            port: self.bus.port,
            keep_alive: Duration::from_secs(self.bus.keep_alive_secs),
            request_capacity: self.bus.request_capacity,
            reconnect_delay: Duration::from_millis(self.bus.reconnect_delay_ms),
            clean_session: false,
        }
    }
}
