//! ICMP latency enrichment
//!
//! Devices found by ARP or a provider often have no open TCP port, so they
//! carry no latency. One echo request each fills the gap; existing values
//! are never overwritten.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use lanscope_common::{EngineConfig, ScanContext};
use lanscope_icmp::IcmpSocket;
use lanscope_orchestrator::{ConnectionBudget, PhaseProgress, ScanAccumulator, ScanPhase};

const PAYLOAD_SIZE: usize = 16;

pub struct IcmpLatencyPhase {
    budget: Arc<ConnectionBudget>,
    max_concurrent: usize,
    timeout: Duration,
}

impl IcmpLatencyPhase {
    pub fn new(budget: Arc<ConnectionBudget>, max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            budget,
            max_concurrent: max_concurrent.max(1),
            timeout,
        }
    }

    pub fn from_config(config: &EngineConfig, budget: Arc<ConnectionBudget>) -> Self {
        Self::new(budget, config.icmp_max_concurrent, config.icmp_timeout)
    }

    /// Each probe gets its own socket so probes do not queue behind one
    /// another. The socket is only opened once a budget slot is held.
    async fn echo(&self, addr: Ipv4Addr) -> Option<f64> {
        let _permit = self.budget.permit().await;
        let socket = IcmpSocket::open().ok()?;
        let response = socket.ping(addr, self.timeout, PAYLOAD_SIZE).await;
        response.is_echo_reply().then_some(response.rtt_ms)
    }
}

#[async_trait]
impl ScanPhase for IcmpLatencyPhase {
    fn id(&self) -> &str {
        "icmp_latency"
    }

    fn display_name(&self) -> &str {
        "Measuring latency"
    }

    fn weight(&self) -> f64 {
        0.10
    }

    async fn execute(
        &self,
        _context: &ScanContext,
        accumulator: &ScanAccumulator,
        progress: &PhaseProgress,
        cancel: &CancellationToken,
    ) {
        progress.report(0.0);

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
            progress.complete();
            return;
        }

        if let Err(e) = IcmpSocket::open() {
            info!(error = %e, "ICMP unavailable, skipping latency enrichment");
            progress.complete();
            return;
        }

        let total = targets.len();
        let limit = self.budget.throttle().effective_limit(self.max_concurrent);
        let mut probes = stream::iter(targets)
            .map(|(ip, addr)| async move { (ip, self.echo(addr).await) })
            .buffer_unordered(limit);

        let mut probed = 0usize;
        let mut enriched = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                next = probes.next() => next,
            };
            let Some((ip, latency)) = next else { break };
            probed += 1;
            if let Some(ms) = latency {
                accumulator.update_latency(&ip, ms).await;
                enriched += 1;
            }
            progress.report_count(probed, total);
        }

        info!(enriched, total, "ICMP latency enrichment finished");
        progress.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanscope_common::{DeviceSource, DiscoveredDevice};
    use lanscope_orchestrator::ProgressTracker;

    fn phase() -> IcmpLatencyPhase {
        IcmpLatencyPhase::new(Arc::new(ConnectionBudget::new(4)), 4, Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_existing_latency_is_kept() {
        let accumulator = ScanAccumulator::new();
        accumulator.upsert(DiscoveredDevice::probed("127.0.0.1", 42.0)).await;
        let context = ScanContext::new(Vec::new(), |_| true, None);

        phase()
            .execute(
                &context,
                &accumulator,
                &ProgressTracker::detached("icmp"),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(accumulator.snapshot().await[0].latency_ms, Some(42.0));
    }

    #[tokio::test]
    async fn test_echo_waits_for_budget_slot() {
        let budget = Arc::new(ConnectionBudget::new(1));
        let phase = IcmpLatencyPhase::new(budget.clone(), 4, Duration::from_millis(200));
        let held = budget.permit().await;

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), phase.echo(Ipv4Addr::LOCALHOST)).await;
        assert!(blocked.is_err());
        assert_eq!(budget.active_count(), 1);

        drop(held);
        let _ = phase.echo(Ipv4Addr::LOCALHOST).await;
        assert_eq!(budget.active_count(), 0);
    }

    #[tokio::test]
    async fn test_loopback_gets_latency_when_icmp_works() {
        let accumulator = ScanAccumulator::new();
        accumulator
            .upsert(DiscoveredDevice::new("127.0.0.1", DeviceSource::Bonjour))
            .await;
        let context = ScanContext::new(Vec::new(), |_| true, None);

        phase()
            .execute(
                &context,
                &accumulator,
                &ProgressTracker::detached("icmp"),
                &CancellationToken::new(),
            )
            .await;

        let device = &accumulator.snapshot().await[0];
        // Sandboxes without ICMP leave the device untouched.
        if let Some(ms) = device.latency_ms {
            assert!(ms >= 0.0);
        }
        assert_eq!(device.source, DeviceSource::Bonjour);
    }
}
