//! Agent self-description sent with every advertise response.

use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs, UdpSocket};

use flotilla_protocol::{unix_timestamp, AdvertisePayload, AgentId};
use serde::{Deserialize, Serialize};

use crate::config::AgentConfig;

/// How the agent discovers the address it reports to the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// Address of the interface that routes to the public internet.
    #[default]
    Direct,
    /// Address the container hostname resolves to.
    Containerized,
}

impl NetworkMode {
    pub fn resolve_address(&self) -> String {
        let resolved = match self {
            Self::Direct => outbound_ip(),
            Self::Containerized => hostname_ip(),
        };
        resolved
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .to_string()
    }
}

/// Connecting a UDP socket sends nothing; it only selects the route.
fn outbound_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

fn hostname_ip() -> Option<IpAddr> {
    let hostname = std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())?;
    (hostname.as_str(), 0)
        .to_socket_addrs()
        .ok()?
        .map(|addr| addr.ip())
        .find(IpAddr::is_ipv4)
}

/// Static hardware facts, overlaid with whatever the config supplies.
pub fn probe_hardware(overrides: &serde_json::Value) -> serde_json::Value {
    let cpu_count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let mut info = serde_json::json!({
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "cpu_count": cpu_count,
    });
    if let (Some(base), Some(extra)) = (info.as_object_mut(), overrides.as_object()) {
        for (key, value) in extra {
            base.insert(key.clone(), value.clone());
        }
    }
    info
}

/// Identity and capabilities of this agent. Computed once at startup.
#[derive(Debug, Clone)]
pub struct AgentDescriptor {
    pub id: AgentId,
    pub display_name: String,
    pub kind: String,
    pub cluster_id: u32,
    pub network_address: String,
    pub hardware_info: serde_json::Value,
    pub dataset_catalog: serde_json::Value,
    pub benchmark_info: serde_json::Value,
}

impl AgentDescriptor {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            id: config.agent_id(),
            display_name: config.agent.name.clone(),
            kind: config.agent.kind.clone(),
            cluster_id: config.agent.cluster_id,
            network_address: config.agent.network_mode.resolve_address(),
            hardware_info: probe_hardware(&config.hardware),
            dataset_catalog: config.datasets.clone(),
            benchmark_info: config.benchmark_info.clone(),
        }
    }

    /// Build the payload for an advertise response listing `models`.
    pub fn advertise_payload(&self, models: Vec<String>) -> AdvertisePayload {
        AdvertisePayload {
            kind: self.kind.clone(),
            timestamp: unix_timestamp(),
            cluster_id: self.cluster_id,
            hw_info: self.hardware_info.clone(),
            datasets: self.dataset_catalog.clone(),
            models,
            benchmark_info: self.benchmark_info.clone(),
            name: self.display_name.clone(),
            ip: Some(self.network_address.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_address_always_yields_ip() {
        for mode in [NetworkMode::Direct, NetworkMode::Containerized] {
            let addr = mode.resolve_address();
            assert!(addr.parse::<IpAddr>().is_ok(), "{mode:?} gave {addr}");
        }
    }

    #[test]
    fn test_probe_hardware_merges_overrides() {
        let info = probe_hardware(&serde_json::json!({"gpu": "none", "os": "custom"}));
        assert_eq!(info["gpu"], "none");
        assert_eq!(info["os"], "custom");
        assert!(info["cpu_count"].as_u64().unwrap() >= 1);
    }

    #[test]
    fn test_advertise_payload_carries_catalog() {
        let mut config = AgentConfig::default();
        config.agent.id = Some("edge-1".into());
        config.agent.name = "bench".into();
        config.datasets = serde_json::json!({"mnist": {"num_items": 10}});
        let descriptor = AgentDescriptor::from_config(&config);

        let payload = descriptor.advertise_payload(vec!["m1".into()]);
        assert_eq!(payload.name, "bench");
        assert_eq!(payload.kind, "edge");
        assert_eq!(payload.models, vec!["m1".to_string()]);
        assert_eq!(payload.datasets["mnist"]["num_items"], 10);
        assert!(payload.ip.is_some());
        assert!(payload.timestamp > 0.0);
    }
}
