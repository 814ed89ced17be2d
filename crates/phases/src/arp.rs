//! Neighbour-table discovery
//!
//! A UDP datagram to every candidate makes the kernel resolve its MAC
//! address; after a settle delay the neighbour table lists every host that
//! answered ARP, whether or not it has any open port.

use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use lanscope_common::{DeviceSource, DiscoveredDevice, EngineConfig, ScanContext};
use lanscope_orchestrator::{PhaseProgress, ScanAccumulator, ScanPhase};

const DEFAULT_TABLE_PATH: &str = "/proc/net/arp";
/// Discard service; nothing needs to listen for ARP to happen.
const POKE_PORT: u16 = 9;
/// ATF_COM: the entry holds a resolved hardware address.
const FLAG_COMPLETE: u32 = 0x2;
const EMPTY_MAC: &str = "00:00:00:00:00:00";

pub struct ArpPhase {
    settle_delay: Duration,
    table_path: PathBuf,
}

impl ArpPhase {
    pub fn new(settle_delay: Duration) -> Self {
        Self {
            settle_delay,
            table_path: PathBuf::from(DEFAULT_TABLE_PATH),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.arp_settle_delay)
    }

    /// Read a different neighbour table file.
    pub fn with_table_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.table_path = path.into();
        self
    }

    async fn poke(&self, context: &ScanContext, cancel: &CancellationToken) {
        let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
            Ok(socket) => socket,
            Err(e) => {
                debug!(error = %e, "cannot open UDP socket for ARP pokes");
                return;
            }
        };

        for ip in context.probe_targets() {
            if cancel.is_cancelled() {
                return;
            }
            let Ok(addr) = ip.parse::<Ipv4Addr>() else { continue };
            // Unreachable or filtered destinations are expected here.
            let _ = socket.send_to(&[0u8], SocketAddr::from((addr, POKE_PORT))).await;
        }
    }
}

#[async_trait]
impl ScanPhase for ArpPhase {
    fn id(&self) -> &str {
        "arp"
    }

    fn display_name(&self) -> &str {
        "Scanning network"
    }

    fn weight(&self) -> f64 {
        0.10
    }

    async fn execute(
        &self,
        context: &ScanContext,
        accumulator: &ScanAccumulator,
        progress: &PhaseProgress,
        cancel: &CancellationToken,
    ) {
        progress.report(0.0);
        self.poke(context, cancel).await;
        progress.report(0.3);

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(self.settle_delay) => {}
        }
        progress.report(0.6);

        let table = match tokio::fs::read_to_string(&self.table_path).await {
            Ok(table) => table,
            Err(e) => {
                debug!(path = %self.table_path.display(), error = %e, "neighbour table unavailable");
                progress.complete();
                return;
            }
        };
        progress.report(0.8);

        let mut found = 0usize;
        for (ip, mac) in parse_arp_table(&table) {
            if !context.in_subnet(&ip) || context.is_local(&ip) {
                continue;
            }
            accumulator
                .upsert(DiscoveredDevice::new(ip, DeviceSource::LocalProbe).with_mac(mac))
                .await;
            found += 1;
        }
        info!(found, "neighbour table read");
        progress.complete();
    }
}

/// `(ip, mac)` for every complete entry of a Linux `/proc/net/arp` dump.
///
/// ```text
/// IP address       HW type     Flags       HW address            Mask     Device
/// 192.168.1.1      0x1         0x2         a4:2b:b0:12:34:56     *        wlan0
/// ```
pub fn parse_arp_table(table: &str) -> Vec<(String, String)> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [ip, _hw_type, flags, mac, ..] = fields.as_slice() else {
                return None;
            };
            let flags = u32::from_str_radix(flags.trim_start_matches("0x"), 16).ok()?;
            if flags & FLAG_COMPLETE == 0 || *mac == EMPTY_MAC {
                return None;
            }
            ip.parse::<Ipv4Addr>().ok()?;
            Some((ip.to_string(), mac.to_lowercase()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanscope_orchestrator::ProgressTracker;

    const TABLE: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.1.1      0x1         0x2         A4:2B:B0:12:34:56     *        wlan0
192.168.1.7      0x1         0x0         00:00:00:00:00:00     *        wlan0
192.168.1.20     0x1         0x2         3c:22:fb:aa:bb:cc     *        wlan0
10.9.9.9         0x1         0x2         11:22:33:44:55:66     *        docker0
192.168.1.30     0x1         0x6         de:ad:be:ef:00:01     *        wlan0
";

    #[test]
    fn test_parses_complete_entries() {
        let entries = parse_arp_table(TABLE);
        assert_eq!(
            entries,
            vec![
                ("192.168.1.1".to_string(), "a4:2b:b0:12:34:56".to_string()),
                ("192.168.1.20".to_string(), "3c:22:fb:aa:bb:cc".to_string()),
                ("10.9.9.9".to_string(), "11:22:33:44:55:66".to_string()),
                ("192.168.1.30".to_string(), "de:ad:be:ef:00:01".to_string()),
            ]
        );
        assert!(parse_arp_table("").is_empty());
        assert!(parse_arp_table("header only\n").is_empty());
    }

    #[tokio::test]
    async fn test_upserts_subnet_entries_except_local() {
        let path = std::env::temp_dir().join(format!("lanscope-arp-{}", std::process::id()));
        tokio::fs::write(&path, TABLE).await.unwrap();

        let phase = ArpPhase::new(Duration::from_millis(1)).with_table_path(&path);
        let context = ScanContext::new(
            Vec::new(),
            |ip| ip.starts_with("192.168.1."),
            Some("192.168.1.20".into()),
        );
        let accumulator = ScanAccumulator::new();
        let progress = ProgressTracker::detached("arp");

        phase
            .execute(&context, &accumulator, &progress, &CancellationToken::new())
            .await;
        let _ = tokio::fs::remove_file(&path).await;

        let devices = accumulator.sorted_snapshot().await;
        let ips: Vec<&str> = devices.iter().map(|d| d.ip.as_str()).collect();
        assert_eq!(ips, vec!["192.168.1.1", "192.168.1.30"]);
        assert_eq!(devices[0].mac.as_deref(), Some("a4:2b:b0:12:34:56"));
        assert_eq!(devices[0].source, DeviceSource::LocalProbe);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_cuts_the_settle_delay() {
        let phase = ArpPhase::new(Duration::from_secs(60)).with_table_path("/nonexistent");
        let context = ScanContext::new(Vec::new(), |_| true, None);
        let accumulator = ScanAccumulator::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let started = tokio::time::Instant::now();
        phase
            .execute(&context, &accumulator, &ProgressTracker::detached("arp"), &cancel)
            .await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(accumulator.is_empty().await);
    }
}
