//! Engine configuration
//!
//! Every tunable the engine, phases and probe services read. The CLI maps
//! its flags and presets onto this struct; embedders build it directly.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{LanscopeError, LanscopeResult};

/// Largest ICMP echo payload a single IPv4 datagram can carry.
pub const MAX_PING_PAYLOAD_SIZE: usize = 65_507;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on concurrently open sockets across all services.
    pub connection_limit: usize,
    /// Hard cap on a single phase's run time.
    pub phase_timeout: Duration,

    pub max_concurrent_hosts: usize,
    /// Ports tried first when probing a host for liveness.
    pub primary_probe_ports: Vec<u16>,
    /// Ports tried when none of the primary ports answered.
    pub secondary_probe_ports: Vec<u16>,
    pub primary_probe_timeout: Duration,
    pub secondary_probe_timeout: Duration,
    /// Concurrent port probes per host.
    pub port_probe_fanout: usize,
    /// Wait between provoking ARP resolution and reading the table.
    pub arp_settle_delay: Duration,

    pub icmp_max_concurrent: usize,
    pub icmp_timeout: Duration,
    pub reverse_dns_concurrency: usize,

    pub port_scan_concurrency: usize,
    pub ping_interval: Duration,
    pub ping_payload_size: usize,
    pub traceroute_max_hops: u8,
    pub traceroute_probes_per_hop: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connection_limit: 60,
            phase_timeout: Duration::from_secs(30),
            max_concurrent_hosts: 40,
            primary_probe_ports: vec![80, 443, 22, 445],
            secondary_probe_ports: vec![7000, 8080, 8443, 62078, 5353, 9100, 1883, 554, 548],
            primary_probe_timeout: Duration::from_millis(500),
            secondary_probe_timeout: Duration::from_millis(800),
            port_probe_fanout: 3,
            arp_settle_delay: Duration::from_secs(2),
            icmp_max_concurrent: 50,
            icmp_timeout: Duration::from_secs(2),
            reverse_dns_concurrency: 20,
            port_scan_concurrency: 50,
            ping_interval: Duration::from_secs(1),
            ping_payload_size: 56,
            traceroute_max_hops: 30,
            traceroute_probes_per_hop: 3,
        }
    }
}

impl EngineConfig {
    /// Short timeouts, no secondary ports, wider fan-out.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            primary_probe_timeout: Duration::from_millis(300),
            secondary_probe_ports: Vec::new(),
            arp_settle_delay: Duration::from_secs(1),
            icmp_timeout: Duration::from_secs(1),
            ping_interval: Duration::from_millis(200),
            traceroute_probes_per_hop: 1,
            ..Self::default()
        }
    }

    /// Longer timeouts for lossy or congested networks.
    #[must_use]
    pub fn accurate() -> Self {
        Self {
            primary_probe_timeout: Duration::from_millis(1000),
            secondary_probe_timeout: Duration::from_millis(1500),
            arp_settle_delay: Duration::from_secs(3),
            icmp_timeout: Duration::from_secs(3),
            ..Self::default()
        }
    }

    /// Low socket pressure for constrained hosts.
    #[must_use]
    pub fn conservative() -> Self {
        Self {
            connection_limit: 16,
            max_concurrent_hosts: 10,
            port_probe_fanout: 1,
            icmp_max_concurrent: 10,
            reverse_dns_concurrency: 5,
            port_scan_concurrency: 10,
            ..Self::default()
        }
    }

    /// Look up a preset by name.
    pub fn preset(name: &str) -> LanscopeResult<Self> {
        match name.trim().to_lowercase().as_str() {
            "balanced" | "default" => Ok(Self::default()),
            "fast" => Ok(Self::fast()),
            "accurate" => Ok(Self::accurate()),
            "conservative" => Ok(Self::conservative()),
            other => Err(LanscopeError::Config(format!("unknown preset '{other}'"))),
        }
    }

    /// Reject values that would stall the engine.
    pub fn validate(&self) -> LanscopeResult<()> {
        let limits = [
            ("connection_limit", self.connection_limit),
            ("max_concurrent_hosts", self.max_concurrent_hosts),
            ("port_probe_fanout", self.port_probe_fanout),
            ("icmp_max_concurrent", self.icmp_max_concurrent),
            ("reverse_dns_concurrency", self.reverse_dns_concurrency),
            ("port_scan_concurrency", self.port_scan_concurrency),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(LanscopeError::Config(format!("{name} must be at least 1")));
            }
        }

        let timeouts = [
            ("phase_timeout", self.phase_timeout),
            ("primary_probe_timeout", self.primary_probe_timeout),
            ("secondary_probe_timeout", self.secondary_probe_timeout),
            ("icmp_timeout", self.icmp_timeout),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(LanscopeError::Config(format!("{name} must be non-zero")));
            }
        }

        if self.ping_payload_size > MAX_PING_PAYLOAD_SIZE {
            return Err(LanscopeError::Config(format!(
                "ping_payload_size must be at most {MAX_PING_PAYLOAD_SIZE}"
            )));
        }

        if self.traceroute_max_hops == 0 {
            return Err(LanscopeError::Config("traceroute_max_hops must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.phase_timeout, Duration::from_secs(30));
        assert_eq!(config.connection_limit, 60);
    }

    #[test]
    fn test_presets_by_name() {
        assert!(EngineConfig::preset("fast").unwrap().secondary_probe_ports.is_empty());
        assert_eq!(EngineConfig::preset("Conservative").unwrap().connection_limit, 16);
        assert!(EngineConfig::preset("turbo").is_err());
    }

    #[test]
    fn test_rejects_zero_limits() {
        let config = EngineConfig {
            connection_limit: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(LanscopeError::Config(_))));

        let config = EngineConfig {
            icmp_timeout: Duration::ZERO,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_oversized_ping_payload() {
        let config = EngineConfig {
            ping_payload_size: MAX_PING_PAYLOAD_SIZE + 1,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(LanscopeError::Config(_))));

        let config = EngineConfig {
            ping_payload_size: MAX_PING_PAYLOAD_SIZE,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_round_trips_through_json() {
        let json = serde_json::to_string(&EngineConfig::accurate()).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.icmp_timeout, Duration::from_secs(3));
    }
}
