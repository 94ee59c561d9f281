//! MQTT transport configuration.
//!
//! Builds `rumqttc` connection options with:
//! - a persistent session (clean session off) so QoS 1 subscriptions
//!   survive reconnects
//! - a bounded request queue between handles and the event loop
//! - a fixed back-off between reconnect attempts

use std::time::Duration;

use rumqttc::MqttOptions;

/// Configuration for the MQTT transport.
#[derive(Debug, Clone)]
pub struct MqttTransportConfig {
    pub host: String,
    pub port: u16,
    /// MQTT keep-alive sent to the broker.
    pub keep_alive: Duration,
    /// Capacity of the request queue shared by all handles.
    pub request_capacity: usize,
    /// Delay before polling again after a connection error.
    pub reconnect_delay: Duration,
    pub clean_session: bool,
}

impl Default for MqttTransportConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            keep_alive: Duration::from_secs(60),
            request_capacity: 64,
            reconnect_delay: Duration::from_secs(1),
            clean_session: false,
        }
    }
}

impl MqttTransportConfig {
    pub fn mqtt_options(&self, client_id: &str) -> MqttOptions {
        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(self.clean_session);
        options
    }
}
