//! Scan accumulator - the merged device store for one scan
//!
//! Every phase writes here concurrently. All access goes through the
//! methods below, which serialize on an internal lock; callers never hold
//! it across their own awaits.

use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

use lanscope_common::DiscoveredDevice;

#[derive(Default)]
struct Inner {
    devices: Vec<DiscoveredDevice>,
    index_by_ip: HashMap<String, usize>,
}

impl Inner {
    fn get_mut(&mut self, ip: &str) -> Option<&mut DiscoveredDevice> {
        let idx = *self.index_by_ip.get(ip)?;
        self.devices.get_mut(idx)
    }
}

#[derive(Default)]
pub struct ScanAccumulator {
    inner: Mutex<Inner>,
}

impl ScanAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a device or merge it into the record with the same IP.
    ///
    /// Fields the incoming record carries replace existing values; fields it
    /// leaves empty never erase anything. The first sighting's timestamp and
    /// source are kept.
    pub async fn upsert(&self, device: DiscoveredDevice) {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.get_mut(&device.ip) {
            merge_into(existing, device);
            return;
        }
        let idx = inner.devices.len();
        inner.index_by_ip.insert(device.ip.clone(), idx);
        inner.devices.push(device);
    }

    /// Overwrite latency for a known IP. Unknown IPs are ignored.
    pub async fn replace_latency(&self, ip: &str, latency_ms: f64) {
        if let Some(device) = self.inner.lock().await.get_mut(ip) {
            device.latency_ms = Some(latency_ms);
        }
    }

    /// Set latency only where none was measured yet.
    pub async fn update_latency(&self, ip: &str, latency_ms: f64) {
        if let Some(device) = self.inner.lock().await.get_mut(ip) {
            if device.latency_ms.is_none() {
                device.latency_ms = Some(latency_ms);
            }
        }
    }

    pub async fn contains(&self, ip: &str) -> bool {
        self.inner.lock().await.index_by_ip.contains_key(ip)
    }

    pub async fn known_ips(&self) -> HashSet<String> {
        self.inner.lock().await.index_by_ip.keys().cloned().collect()
    }

    /// IPs in first-seen order.
    pub async fn all_device_ips(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .devices
            .iter()
            .map(|d| d.ip.clone())
            .collect()
    }

    /// Devices found by some phase but still missing a latency measurement.
    pub async fn ips_without_latency(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .devices
            .iter()
            .filter(|d| d.latency_ms.is_none())
            .map(|d| d.ip.clone())
            .collect()
    }

    /// Records in first-seen order.
    pub async fn snapshot(&self) -> Vec<DiscoveredDevice> {
        self.inner.lock().await.devices.clone()
    }

    /// Records ordered by numeric IPv4 value.
    pub async fn sorted_snapshot(&self) -> Vec<DiscoveredDevice> {
        let mut devices = self.snapshot().await;
        devices.sort_by_key(DiscoveredDevice::sort_key);
        devices
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.devices.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn reset(&self) {
        *self.inner.lock().await = Inner::default();
    }
}

fn merge_into(existing: &mut DiscoveredDevice, incoming: DiscoveredDevice) {
    if incoming.hostname.is_some() {
        existing.hostname = incoming.hostname;
    }
    if incoming.vendor.is_some() {
        existing.vendor = incoming.vendor;
    }
    if incoming.mac.is_some() {
        existing.mac = incoming.mac;
    }
    if incoming.latency_ms.is_some() {
        existing.latency_ms = incoming.latency_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanscope_common::DeviceSource;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_upsert_same_ip_keeps_one_record() {
        let acc = ScanAccumulator::new();
        acc.upsert(DiscoveredDevice::probed("192.168.1.10", 4.0)).await;
        acc.upsert(DiscoveredDevice::probed("192.168.1.10", 5.0)).await;

        assert_eq!(acc.known_ips().await.len(), 1);
        assert_eq!(acc.len().await, 1);
    }

    #[tokio::test]
    async fn test_merge_fills_gaps_without_erasing() {
        let acc = ScanAccumulator::new();
        acc.upsert(
            DiscoveredDevice::new("10.0.0.7", DeviceSource::Bonjour).with_hostname("tv.local"),
        )
        .await;
        acc.upsert(DiscoveredDevice::probed("10.0.0.7", 12.5)).await;

        let snap = acc.snapshot().await;
        assert_eq!(snap[0].hostname.as_deref(), Some("tv.local"));
        assert_eq!(snap[0].latency_ms, Some(12.5));
        assert_eq!(snap[0].source, DeviceSource::Bonjour);
    }

    #[tokio::test]
    async fn test_merge_replaces_populated_fields() {
        let acc = ScanAccumulator::new();
        acc.upsert(DiscoveredDevice::new("10.0.0.8", DeviceSource::Ssdp).with_hostname("old"))
            .await;
        acc.upsert(DiscoveredDevice::new("10.0.0.8", DeviceSource::LocalProbe).with_hostname("new"))
            .await;
        assert_eq!(acc.snapshot().await[0].hostname.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_latency_updates() {
        let acc = ScanAccumulator::new();
        acc.upsert(DiscoveredDevice::new("10.0.0.1", DeviceSource::LocalProbe)).await;

        acc.update_latency("10.0.0.1", 3.0).await;
        acc.update_latency("10.0.0.1", 9.0).await;
        assert_eq!(acc.snapshot().await[0].latency_ms, Some(3.0));

        acc.replace_latency("10.0.0.1", 9.0).await;
        assert_eq!(acc.snapshot().await[0].latency_ms, Some(9.0));

        acc.replace_latency("10.0.0.99", 1.0).await;
        acc.update_latency("10.0.0.99", 1.0).await;
        assert!(!acc.contains("10.0.0.99").await);
        assert!(acc.ips_without_latency().await.is_empty());
    }

    #[tokio::test]
    async fn test_sorted_snapshot_orders_numerically() {
        let acc = ScanAccumulator::new();
        for ip in ["192.168.1.100", "192.168.1.2", "192.168.1.10"] {
            acc.upsert(DiscoveredDevice::new(ip, DeviceSource::LocalProbe)).await;
        }
        let ips: Vec<String> = acc.sorted_snapshot().await.into_iter().map(|d| d.ip).collect();
        assert_eq!(ips, vec!["192.168.1.2", "192.168.1.10", "192.168.1.100"]);
        assert_eq!(
            acc.all_device_ips().await,
            vec!["192.168.1.100", "192.168.1.2", "192.168.1.10"]
        );
    }

    #[tokio::test]
    async fn test_concurrent_upserts_deduplicate() {
        let acc = Arc::new(ScanAccumulator::new());
        let mut handles = Vec::new();
        for i in 0..50u32 {
            let acc = acc.clone();
            handles.push(tokio::spawn(async move {
                let ip = format!("10.0.0.{}", i % 5);
                acc.upsert(DiscoveredDevice::new(ip, DeviceSource::LocalProbe)).await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(acc.known_ips().await.len(), 5);

        acc.reset().await;
        assert!(acc.is_empty().await);
    }
}
