//! Lanscope Phases - the discovery techniques a scan is built from
//!
//! Each phase implements `ScanPhase` and merges what it finds into the
//! shared accumulator. `standard_pipeline` wires them in the usual order:
//! passive sources first, active probing next, enrichment last.

mod arp;
mod icmp_latency;
mod provider;
mod reverse_dns;
mod tcp_probe;

pub use arp::{parse_arp_table, ArpPhase};
pub use icmp_latency::IcmpLatencyPhase;
pub use provider::ProviderPhase;
pub use reverse_dns::ReverseDnsPhase;
pub use tcp_probe::TcpProbePhase;

use std::sync::Arc;

use lanscope_common::{DeviceProvider, EngineConfig};
use lanscope_orchestrator::{ConnectionBudget, ScanPhase, ScanPipeline};

/// `[ARP + providers]` together, then TCP probing, ICMP latency and
/// reverse DNS one after another.
pub fn standard_pipeline(
    config: &EngineConfig,
    budget: Arc<ConnectionBudget>,
    providers: Vec<Arc<dyn DeviceProvider>>,
) -> ScanPipeline {
    let mut passive: Vec<Arc<dyn ScanPhase>> = vec![Arc::new(ArpPhase::from_config(config))];
    for provider in providers {
        passive.push(Arc::new(ProviderPhase::new(provider)));
    }

    ScanPipeline::new()
        .then_concurrent(passive)
        .then(Arc::new(TcpProbePhase::from_config(config, Arc::clone(&budget))))
        .then(Arc::new(IcmpLatencyPhase::from_config(config, budget)))
        .then(Arc::new(ReverseDnsPhase::from_config(config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lanscope_common::{DeviceSource, DiscoveredDevice, ScanContext};
    use tokio_util::sync::CancellationToken;

    struct Ssdp;

    #[async_trait]
    impl DeviceProvider for Ssdp {
        fn name(&self) -> &str {
            "ssdp"
        }

        fn source(&self) -> DeviceSource {
            DeviceSource::Ssdp
        }

        async fn discover(&self, _context: &ScanContext, _cancel: &CancellationToken) -> Vec<DiscoveredDevice> {
            Vec::new()
        }
    }

    #[test]
    fn test_standard_order() {
        let budget = Arc::new(ConnectionBudget::new(8));
        let pipeline = standard_pipeline(&EngineConfig::default(), budget, vec![Arc::new(Ssdp)]);

        assert_eq!(
            pipeline.phase_ids(),
            vec!["arp", "ssdp", "tcp_probe", "icmp_latency", "reverse_dns"]
        );
        assert!(pipeline.steps[0].runs_concurrently());
        assert_eq!(pipeline.steps.len(), 4);
    }

    #[test]
    fn test_without_providers_arp_runs_alone() {
        let budget = Arc::new(ConnectionBudget::new(8));
        let pipeline = standard_pipeline(&EngineConfig::fast(), budget, Vec::new());
        assert!(!pipeline.steps[0].runs_concurrently());
        assert!((pipeline.total_weight() - 0.83).abs() < 1e-9);
    }
}
