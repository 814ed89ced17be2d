//! Adapter running an external `DeviceProvider` as a scan phase

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use lanscope_common::net::cleaned_ipv4;
use lanscope_common::{DeviceProvider, ScanContext};
use lanscope_orchestrator::{PhaseProgress, ScanAccumulator, ScanPhase};

const DEFAULT_WEIGHT: f64 = 0.13;

pub struct ProviderPhase {
    provider: Arc<dyn DeviceProvider>,
    display_name: String,
    weight: f64,
}

impl ProviderPhase {
    pub fn new(provider: Arc<dyn DeviceProvider>) -> Self {
        let display_name = format!("Discovering via {}", provider.name());
        Self {
            provider,
            display_name,
            weight: DEFAULT_WEIGHT,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

#[async_trait]
impl ScanPhase for ProviderPhase {
    fn id(&self) -> &str {
        self.provider.name()
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    async fn execute(
        &self,
        context: &ScanContext,
        accumulator: &ScanAccumulator,
        progress: &PhaseProgress,
        cancel: &CancellationToken,
    ) {
        progress.report(0.0);
        let devices = self.provider.discover(context, cancel).await;
        progress.report(0.5);

        let offered = devices.len();
        let source = self.provider.source();
        let mut kept = 0usize;
        for mut device in devices {
            // Zone-scoped and IPv6 addresses are dropped here.
            let Some(ip) = cleaned_ipv4(&device.ip) else { continue };
            if !context.in_subnet(&ip) || context.is_local(&ip) {
                continue;
            }
            device.ip = ip;
            device.source = source;
            accumulator.upsert(device).await;
            kept += 1;
        }

        debug!(provider = self.provider.name(), offered, kept, "provider results merged");
        progress.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanscope_common::{DeviceSource, DiscoveredDevice};
    use lanscope_orchestrator::ProgressTracker;

    struct Canned(Vec<DiscoveredDevice>);

    #[async_trait]
    impl DeviceProvider for Canned {
        fn name(&self) -> &str {
            "bonjour"
        }

        fn source(&self) -> DeviceSource {
            DeviceSource::Bonjour
        }

        async fn discover(&self, _context: &ScanContext, _cancel: &CancellationToken) -> Vec<DiscoveredDevice> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_filters_cleans_and_stamps_provider_results() {
        let provider = Canned(vec![
            DiscoveredDevice::new("192.168.1.4%en0", DeviceSource::LocalProbe).with_hostname("tv.local"),
            DiscoveredDevice::new("fe80::1%en0", DeviceSource::Bonjour),
            DiscoveredDevice::new("10.0.0.9", DeviceSource::Bonjour),
            DiscoveredDevice::new("192.168.1.2", DeviceSource::Bonjour),
        ]);
        let phase = ProviderPhase::new(Arc::new(provider));
        assert_eq!(phase.id(), "bonjour");

        let context = ScanContext::new(
            Vec::new(),
            |ip| ip.starts_with("192.168.1."),
            Some("192.168.1.2".into()),
        );
        let accumulator = ScanAccumulator::new();
        phase
            .execute(
                &context,
                &accumulator,
                &ProgressTracker::detached("bonjour"),
                &CancellationToken::new(),
            )
            .await;

        let devices = accumulator.snapshot().await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].ip, "192.168.1.4");
        assert_eq!(devices[0].hostname.as_deref(), Some("tv.local"));
        assert_eq!(devices[0].source, DeviceSource::Bonjour);
    }
}
