//! PTR lookups for devices still lacking a hostname

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use lanscope_common::{DiscoveredDevice, EngineConfig, ScanContext};
use lanscope_orchestrator::{PhaseProgress, ScanAccumulator, ScanPhase};
use lanscope_target_resolver::NameResolver;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

pub struct ReverseDnsPhase {
    concurrency: usize,
    timeout: Duration,
}

impl ReverseDnsPhase {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            timeout: LOOKUP_TIMEOUT,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.reverse_dns_concurrency)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ScanPhase for ReverseDnsPhase {
    fn id(&self) -> &str {
        "reverse_dns"
    }

    fn display_name(&self) -> &str {
        "Resolving names"
    }

    fn weight(&self) -> f64 {
        0.08
    }

    async fn execute(
        &self,
        _context: &ScanContext,
        accumulator: &ScanAccumulator,
        progress: &PhaseProgress,
        cancel: &CancellationToken,
    ) {
        progress.report(0.0);

        let unnamed: Vec<(DiscoveredDevice, Ipv4Addr)> = accumulator
            .snapshot()
            .await
            .into_iter()
            .filter(|d| d.hostname.is_none())
            .filter_map(|d| {
                let addr = d.ip.parse().ok()?;
                Some((d, addr))
            })
            .collect();
        if unnamed.is_empty() {
            progress.complete();
            return;
        }

        let names = NameResolver::from_system(self.timeout);
        let total = unnamed.len();
        let names = &names;
        let mut lookups = stream::iter(unnamed)
            .map(|(device, addr)| async move { (device, names.reverse(addr).await) })
            .buffer_unordered(self.concurrency);

        let mut done = 0usize;
        let mut named = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                next = lookups.next() => next,
            };
            let Some((device, hostname)) = next else { break };
            done += 1;
            if let Some(hostname) = hostname {
                accumulator
                    .upsert(DiscoveredDevice::new(device.ip, device.source).with_hostname(hostname))
                    .await;
                named += 1;
            }
            progress.report_count(done, total);
        }

        debug!(named, total, "reverse lookups finished");
        progress.complete();
    }
}
