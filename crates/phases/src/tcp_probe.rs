//! TCP liveness probing
//!
//! Hosts no earlier phase found are probed on a short list of high-yield
//! ports, then a broader secondary list. Any answer counts: an accepted
//! connection or a reset both prove the host is up. Timeouts adapt to the
//! RTTs observed so far in the scan.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use lanscope_common::{DiscoveredDevice, EngineConfig, ScanContext};
use lanscope_orchestrator::{ConnectionBudget, PhaseProgress, RttTracker, ScanAccumulator, ScanPhase};
use lanscope_probes::tcp_probe;

/// Share of the phase's progress spent on discovery; the rest is latency
/// enrichment.
const DISCOVERY_SHARE: f64 = 0.9;
const LATENCY_PORT: u16 = 443;
const LATENCY_BASE_TIMEOUT: Duration = Duration::from_millis(200);

pub struct TcpProbePhase {
    budget: Arc<ConnectionBudget>,
    max_concurrent_hosts: usize,
    primary_ports: Vec<u16>,
    secondary_ports: Vec<u16>,
    primary_timeout: Duration,
    secondary_timeout: Duration,
    port_fanout: usize,
}

impl TcpProbePhase {
    pub fn from_config(config: &EngineConfig, budget: Arc<ConnectionBudget>) -> Self {
        Self {
            budget,
            max_concurrent_hosts: config.max_concurrent_hosts.max(1),
            primary_ports: config.primary_probe_ports.clone(),
            secondary_ports: config.secondary_probe_ports.clone(),
            primary_timeout: config.primary_probe_timeout,
            secondary_timeout: config.secondary_probe_timeout,
            port_fanout: config.port_probe_fanout.max(1),
        }
    }

    fn host_limit(&self) -> usize {
        self.budget.throttle().effective_limit(self.max_concurrent_hosts)
    }

    async fn probe_host(&self, ip: String, rtt: &RttTracker) -> Option<DiscoveredDevice> {
        let addr: Ipv4Addr = ip.parse().ok()?;

        let wait = rtt.timeout(self.primary_timeout);
        if let Some(latency) = self.probe_ports(addr, &self.primary_ports, wait, rtt).await {
            return Some(DiscoveredDevice::probed(ip, latency));
        }

        let wait = rtt.timeout(self.secondary_timeout);
        let latency = self.probe_ports(addr, &self.secondary_ports, wait, rtt).await?;
        Some(DiscoveredDevice::probed(ip, latency))
    }

    /// First answering port's RTT. Remaining probes are dropped as soon as
    /// one answers.
    async fn probe_ports(&self, addr: Ipv4Addr, ports: &[u16], wait: Duration, rtt: &RttTracker) -> Option<f64> {
        let mut probes = stream::iter(ports.iter().copied())
            .map(|port| tcp_probe(SocketAddr::from((addr, port)), wait, &self.budget))
            .buffer_unordered(self.port_fanout);

        while let Some(outcome) = probes.next().await {
            if let Some(ms) = outcome.rtt_ms() {
                rtt.record(Duration::from_secs_f64(ms / 1000.0));
                return Some(ms);
            }
        }
        None
    }

    /// Single-port latency for devices other phases found without one.
    async fn enrich_latency(&self, accumulator: &ScanAccumulator, rtt: &RttTracker, cancel: &CancellationToken) {
        let targets: Vec<(String, Ipv4Addr)> = accumulator
            .ips_without_latency()
            .await
            .into_iter()
            .filter_map(|ip| {
                let addr = ip.parse().ok()?;
                Some((ip, addr))
            })
            .collect();
        if targets.is_empty() {
            return;
        }
        debug!(devices = targets.len(), "measuring latency of known devices");

        let mut probes = stream::iter(targets)
            .map(|(ip, addr)| async move {
                let wait = rtt.timeout(LATENCY_BASE_TIMEOUT);
                let outcome = tcp_probe(SocketAddr::from((addr, LATENCY_PORT)), wait, &self.budget).await;
                (ip, outcome.rtt_ms())
            })
            .buffer_unordered(self.host_limit());

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                next = probes.next() => next,
            };
            let Some((ip, latency)) = next else { break };
            if let Some(ms) = latency {
                accumulator.update_latency(&ip, ms).await;
                rtt.record(Duration::from_secs_f64(ms / 1000.0));
            }
        }
    }
}

#[async_trait]
impl ScanPhase for TcpProbePhase {
    fn id(&self) -> &str {
        "tcp_probe"
    }

    fn display_name(&self) -> &str {
        "Probing ports"
    }

    fn weight(&self) -> f64 {
        0.55
    }

    async fn execute(
        &self,
        context: &ScanContext,
        accumulator: &ScanAccumulator,
        progress: &PhaseProgress,
        cancel: &CancellationToken,
    ) {
        progress.report(0.0);

        let known = accumulator.known_ips().await;
        let hosts: Vec<String> = context
            .probe_targets()
            .filter(|ip| !known.contains(*ip))
            .map(str::to_string)
            .collect();

        let rtt = RttTracker::new();
        let total = hosts.len();
        let mut probed = 0usize;
        let mut alive = 0usize;

        if total > 0 {
            let mut probes = stream::iter(hosts)
                .map(|ip| self.probe_host(ip, &rtt))
                .buffer_unordered(self.host_limit());

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    next = probes.next() => next,
                };
                let Some(found) = next else { break };
                probed += 1;
                if let Some(device) = found {
                    alive += 1;
                    accumulator.upsert(device).await;
                }
                progress.report(DISCOVERY_SHARE * probed as f64 / total as f64);
            }
        }
        info!(probed, alive, "tcp probing finished");
        progress.report(DISCOVERY_SHARE);

        self.enrich_latency(accumulator, &rtt, cancel).await;
        progress.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanscope_orchestrator::ProgressTracker;
    use tokio::net::TcpListener;

    fn phase_with_ports(primary: Vec<u16>, secondary: Vec<u16>) -> TcpProbePhase {
        let config = EngineConfig {
            primary_probe_ports: primary,
            secondary_probe_ports: secondary,
            primary_probe_timeout: Duration::from_millis(300),
            secondary_probe_timeout: Duration::from_millis(300),
            ..EngineConfig::default()
        };
        TcpProbePhase::from_config(&config, Arc::new(ConnectionBudget::new(8)))
    }

    #[tokio::test]
    async fn test_finds_loopback_via_secondary_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // The primary list is empty, so only the secondary list can succeed.
        let phase = phase_with_ports(Vec::new(), vec![port]);

        let context = ScanContext::new(vec!["127.0.0.1".into()], |_| true, None);
        let accumulator = ScanAccumulator::new();
        phase
            .execute(
                &context,
                &accumulator,
                &ProgressTracker::detached("tcp"),
                &CancellationToken::new(),
            )
            .await;

        let devices = accumulator.snapshot().await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].ip, "127.0.0.1");
        assert!(devices[0].latency_ms.is_some());
    }

    #[tokio::test]
    async fn test_known_hosts_are_not_reprobed() {
        let phase = phase_with_ports(vec![1], Vec::new());
        let context = ScanContext::new(vec!["127.0.0.1".into()], |_| true, None);
        let accumulator = ScanAccumulator::new();
        accumulator
            .upsert(DiscoveredDevice::probed("127.0.0.1", 0.5).with_hostname("me"))
            .await;

        phase
            .execute(
                &context,
                &accumulator,
                &ProgressTracker::detached("tcp"),
                &CancellationToken::new(),
            )
            .await;

        let devices = accumulator.snapshot().await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].latency_ms, Some(0.5));
        assert_eq!(devices[0].hostname.as_deref(), Some("me"));
    }

    #[tokio::test]
    async fn test_cancelled_phase_adds_nothing() {
        let phase = phase_with_ports(vec![80], Vec::new());
        let context = ScanContext::new(vec!["127.0.0.1".into()], |_| true, None);
        let accumulator = ScanAccumulator::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        phase
            .execute(&context, &accumulator, &ProgressTracker::detached("tcp"), &cancel)
            .await;
        assert!(accumulator.is_empty().await);
    }
}
