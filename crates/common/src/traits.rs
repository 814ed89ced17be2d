//! Collaborator traits
//!
//! Discovery sources that live outside the engine (Bonjour browsing, SSDP
//! listeners, a paired companion device) plug in through `DeviceProvider`.
//! The engine treats them as opaque: whatever they return is merged into
//! the scan accumulator like any other phase's output.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::types::{DeviceSource, DiscoveredDevice, ScanContext};

#[async_trait]
pub trait DeviceProvider: Send + Sync {
    /// Stable identifier, used as the wrapping phase's id.
    fn name(&self) -> &str;

    /// Source tag the wrapping phase stamps on every device this provider
    /// returns.
    fn source(&self) -> DeviceSource;

    /// Collect devices. Implementations should return what they have so far
    /// once `cancel` fires instead of blocking further.
    async fn discover(
        &self,
        context: &ScanContext,
        cancel: &CancellationToken,
    ) -> Vec<DiscoveredDevice>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider;

    #[async_trait]
    impl DeviceProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        fn source(&self) -> DeviceSource {
            DeviceSource::Ssdp
        }

        async fn discover(
            &self,
            context: &ScanContext,
            _cancel: &CancellationToken,
        ) -> Vec<DiscoveredDevice> {
            context
                .probe_targets()
                .map(|ip| DiscoveredDevice::new(ip, self.source()))
                .collect()
        }
    }

    #[tokio::test]
    async fn test_provider_trait() {
        let ctx = ScanContext::new(vec!["10.0.0.1".into()], |_| true, None);
        let devices = FixedProvider
            .discover(&ctx, &CancellationToken::new())
            .await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].source, DeviceSource::Ssdp);
    }
}
