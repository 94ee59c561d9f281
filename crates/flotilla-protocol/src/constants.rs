/// Default topic namespace shared by controller and agents.
pub const TOPIC_PREFIX: &str = "flotilla";

/// Default MQTT broker port.
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Heartbeat interval used until the controller announces one.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: f64 = 5.0;

/// Default cluster id reported in the advertise response.
pub const DEFAULT_CLUSTER_ID: u32 = 0;

/// Subdirectory of the agent work dir holding extracted model artifacts.
pub const MODEL_CACHE_DIR: &str = "model_cache";
