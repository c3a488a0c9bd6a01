use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const MDNS_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
pub const MDNS_PORT: u16 = 5353;

/// Service configuration. Every field has a default, so a config file only needs
/// the values it changes.
///
/// When `group` is not a multicast address no membership is joined and traffic is
/// sent unicast to `group:port` (handy for tests on loopback).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MdnsConfig {
    pub group: Ipv4Addr,
    pub port: u16,
    /// interface address used for membership and outgoing multicast
    pub interface: Ipv4Addr,
    pub multicast_loopback: bool,
    pub reuse_address: bool,
    /// defaults to `<system hostname>.local`
    pub host_name: Option<String>,
    /// address put into A records, defaults to the first non-loopback IPv4 address
    pub local_address: Option<Ipv4Addr>,
    pub default_ttl: u32,
    pub announce_delay_ms: u64,
    pub announce_interval_ms: u64,
    pub respond_to_queries: bool,
    pub max_datagram_size: usize,
    pub bind_retry_attempts: u32,
    pub bind_retry_delay_ms: u64,
}

impl Default for MdnsConfig {
    fn default() -> Self {
        Self {
            group: MDNS_GROUP,
            port: MDNS_PORT,
            interface: Ipv4Addr::UNSPECIFIED,
            multicast_loopback: true,
            reuse_address: true,
            host_name: None,
            local_address: None,
            default_ttl: 120,
            announce_delay_ms: 5000,
            announce_interval_ms: 5000,
            respond_to_queries: true,
            max_datagram_size: 9000,
            bind_retry_attempts: 10,
            bind_retry_delay_ms: 50,
        }
    }
}

impl MdnsConfig {
    pub fn load(path: &str) -> Result<Self> {
        let data =
            std::fs::read_to_string(path).context(format!("reading config from {}", path))?;
        serde_json::from_str(&data).context(format!("parsing config {}", path))
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data).context(format!("writing config to {}", path))
    }

    pub fn destination(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.group, self.port))
    }

    pub fn announce_delay(&self) -> Duration {
        Duration::from_millis(self.announce_delay_ms)
    }

    pub fn announce_interval(&self) -> Duration {
        // interval of zero would make tokio panic
        Duration::from_millis(self.announce_interval_ms.max(1))
    }

    /// Backoff before the n-th bind retry (1-based), doubling up to one second.
    pub fn bind_retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(10);
        Duration::from_millis(self.bind_retry_delay_ms.saturating_mul(factor).min(1000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_path(name: &str) -> String {
        let dir = std::env::temp_dir().join(format!("lanmdns_test_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("config.json").to_str().unwrap().to_owned()
    }

    #[test]
    fn defaults() {
        let c = MdnsConfig::default();
        assert_eq!(c.destination().to_string(), "224.0.0.251:5353");
        assert_eq!(c.default_ttl, 120);
        assert_eq!(c.announce_delay(), Duration::from_secs(5));
        assert_eq!(c.announce_interval(), Duration::from_secs(5));
    }

    #[test]
    fn partial_file_uses_defaults() {
        let c: MdnsConfig = serde_json::from_str(r#"{"port": 15353, "host_name": "box.local"}"#).unwrap();
        assert_eq!(c.port, 15353);
        assert_eq!(c.host_name.as_deref(), Some("box.local"));
        assert_eq!(c.group, MDNS_GROUP);
        assert!(c.multicast_loopback);
    }

    #[test]
    fn save_and_load() {
        let path = test_path("config_rt");
        let c = MdnsConfig {
            local_address: Some(Ipv4Addr::new(10, 1, 2, 3)),
            respond_to_queries: false,
            ..Default::default()
        };
        c.save(&path).unwrap();
        assert_eq!(MdnsConfig::load(&path).unwrap(), c);
        assert!(MdnsConfig::load("/nonexistent/lanmdns.json").is_err());
    }

    #[test]
    fn retry_backoff_is_bounded() {
        let c = MdnsConfig::default();
        assert_eq!(c.bind_retry_delay(1), Duration::from_millis(50));
        assert_eq!(c.bind_retry_delay(2), Duration::from_millis(100));
        assert_eq!(c.bind_retry_delay(30), Duration::from_millis(1000));
    }
}
