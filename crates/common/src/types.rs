//! Core data types for the Lanscope probing engine
//!
//! Records here are plain values: the accumulator, the probe services and
//! the CLI move them around by clone. Public fields keep call sites short.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use crate::net::ip_sort_key;

/// How a device was first seen on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSource {
    LocalProbe,
    Bonjour,
    Ssdp,
    Companion,
}

impl DeviceSource {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DeviceSource::LocalProbe => "local",
            DeviceSource::Bonjour => "bonjour",
            DeviceSource::Ssdp => "ssdp",
            DeviceSource::Companion => "companion",
        }
    }
}

impl fmt::Display for DeviceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One host found during a scan, keyed by its IP address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub ip: String,
    pub hostname: Option<String>,
    pub vendor: Option<String>,
    pub mac: Option<String>,
    /// Round-trip latency in milliseconds.
    pub latency_ms: Option<f64>,
    pub discovered_at: SystemTime,
    pub source: DeviceSource,
}

impl DiscoveredDevice {
    /// A bare sighting with no attributes beyond the address.
    #[must_use]
    pub fn new<S: Into<String>>(ip: S, source: DeviceSource) -> Self {
        Self {
            ip: ip.into(),
            hostname: None,
            vendor: None,
            mac: None,
            latency_ms: None,
            discovered_at: SystemTime::now(),
            source,
        }
    }

    /// A device found alive by a local probe with a measured latency.
    #[must_use]
    pub fn probed<S: Into<String>>(ip: S, latency_ms: f64) -> Self {
        Self::new(ip, DeviceSource::LocalProbe).with_latency(latency_ms)
    }

    #[inline]
    #[must_use]
    pub fn with_hostname<S: Into<String>>(mut self, hostname: S) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_vendor<S: Into<String>>(mut self, vendor: S) -> Self {
        self.vendor = Some(vendor.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_mac<S: Into<String>>(mut self, mac: S) -> Self {
        self.mac = Some(mac.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_latency(mut self, latency_ms: f64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    /// Hostname when known, otherwise the address.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.hostname.as_deref().unwrap_or(&self.ip)
    }

    /// Numeric ordering key for the address (dotted quad as a u32).
    #[inline]
    #[must_use]
    pub fn sort_key(&self) -> u32 {
        ip_sort_key(&self.ip)
    }
}

/// Immutable per-scan configuration shared by every phase.
#[derive(Clone)]
pub struct ScanContext {
    /// Candidate addresses to probe.
    pub hosts: Vec<String>,
    subnet_filter: Arc<dyn Fn(&str) -> bool + Send + Sync>,
    /// The scanning machine's own address, never probed.
    pub local_ip: Option<String>,
}

impl ScanContext {
    pub fn new<F>(hosts: Vec<String>, subnet_filter: F, local_ip: Option<String>) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            hosts,
            subnet_filter: Arc::new(subnet_filter),
            local_ip,
        }
    }

    /// Whether `ip` belongs to the scanned subnet.
    #[inline]
    #[must_use]
    pub fn in_subnet(&self, ip: &str) -> bool {
        (self.subnet_filter)(ip)
    }

    #[inline]
    #[must_use]
    pub fn is_local(&self, ip: &str) -> bool {
        self.local_ip.as_deref() == Some(ip)
    }

    /// Candidate hosts minus the local address.
    pub fn probe_targets(&self) -> impl Iterator<Item = &str> + '_ {
        self.hosts
            .iter()
            .map(String::as_str)
            .filter(move |ip| !self.is_local(ip))
    }
}

impl fmt::Debug for ScanContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanContext")
            .field("hosts", &self.hosts.len())
            .field("local_ip", &self.local_ip)
            .finish_non_exhaustive()
    }
}

/// Port states returned by the connect scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortState::Open => "open",
            PortState::Closed => "closed",
            PortState::Filtered => "filtered",
        };
        f.write_str(s)
    }
}

/// Outcome of probing one port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortScanResult {
    pub port: u16,
    pub state: PortState,
    pub service: Option<String>,
    pub banner: Option<String>,
    /// Connect time in milliseconds, recorded for open ports.
    pub response_time_ms: Option<f64>,
}

impl PortScanResult {
    #[inline]
    #[must_use]
    pub fn new(port: u16, state: PortState) -> Self {
        Self {
            port,
            state,
            service: None,
            banner: None,
            response_time_ms: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_service<S: Into<String>>(mut self, service: S) -> Self {
        self.service = Some(service.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_banner(mut self, banner: String) -> Self {
        self.banner = Some(banner);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_response_time(mut self, ms: f64) -> Self {
        self.response_time_ms = Some(ms);
        self
    }

    #[inline]
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.state, PortState::Open)
    }
}

/// One ping attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingResult {
    pub sequence: u16,
    pub host: String,
    pub ip: Option<String>,
    pub ttl: Option<u8>,
    /// Round-trip time in milliseconds (elapsed wait time for timeouts).
    pub time_ms: f64,
    pub size: usize,
    pub is_timeout: bool,
    pub timestamp: SystemTime,
}

impl PingResult {
    #[must_use]
    pub fn reply<S: Into<String>>(sequence: u16, host: S, time_ms: f64) -> Self {
        Self {
            sequence,
            host: host.into(),
            ip: None,
            ttl: None,
            time_ms,
            size: 64,
            is_timeout: false,
            timestamp: SystemTime::now(),
        }
    }

    #[must_use]
    pub fn timeout<S: Into<String>>(sequence: u16, host: S, waited_ms: f64) -> Self {
        Self {
            is_timeout: true,
            ..Self::reply(sequence, host, waited_ms)
        }
    }

    #[inline]
    #[must_use]
    pub fn with_ip(mut self, ip: Option<String>) -> Self {
        self.ip = ip;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_ttl(mut self, ttl: Option<u8>) -> Self {
        self.ttl = ttl;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }
}

/// Summary over a finished ping run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingStatistics {
    pub host: String,
    pub transmitted: usize,
    pub received: usize,
    /// Percentage in [0, 100].
    pub packet_loss: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    /// Sample standard deviation; needs at least two replies.
    pub std_dev_ms: Option<f64>,
}

impl PingStatistics {
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.transmitted == 0 {
            0.0
        } else {
            self.received as f64 / self.transmitted as f64 * 100.0
        }
    }
}

/// One traceroute hop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracerouteHop {
    pub hop: u8,
    pub ip: Option<String>,
    pub hostname: Option<String>,
    /// Per-probe round-trip times in milliseconds.
    pub times_ms: Vec<f64>,
    pub is_timeout: bool,
}

impl TracerouteHop {
    #[must_use]
    pub fn timed_out(hop: u8) -> Self {
        Self {
            hop,
            ip: None,
            hostname: None,
            times_ms: Vec::new(),
            is_timeout: true,
        }
    }

    #[must_use]
    pub fn reached(hop: u8, ip: String, times_ms: Vec<f64>) -> Self {
        Self {
            hop,
            ip: Some(ip),
            hostname: None,
            times_ms,
            is_timeout: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_hostname(mut self, hostname: Option<String>) -> Self {
        self.hostname = hostname;
        self
    }

    #[must_use]
    pub fn average_ms(&self) -> Option<f64> {
        if self.times_ms.is_empty() {
            None
        } else {
            Some(self.times_ms.iter().sum::<f64>() / self.times_ms.len() as f64)
        }
    }

    /// Address shown for the hop, `*` when nothing answered.
    #[must_use]
    pub fn display_address(&self) -> &str {
        if self.is_timeout {
            return "*";
        }
        self.hostname
            .as_deref()
            .or(self.ip.as_deref())
            .unwrap_or("*")
    }
}
