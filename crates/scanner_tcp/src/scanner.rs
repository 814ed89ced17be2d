//! Streaming TCP connect scanner

use parking_lot::Mutex;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use lanscope_common::{EngineConfig, PortScanResult, PortState};
use lanscope_fingerprint::{common_service_name, detect_service};
use lanscope_orchestrator::{ConnectionBudget, ResultStream};
use lanscope_target_resolver::resolve_host;

use crate::banner::{wants_banner, BannerGrabber};

pub const DEFAULT_SCAN_CONCURRENCY: usize = 50;

/// Per-port probe knobs.
#[derive(Debug, Clone, Copy)]
pub struct ProbeSettings {
    pub connect_timeout: Duration,
    pub banner_timeout: Duration,
    pub grab_banners: bool,
}

/// Connect scanner bound to a shared connection budget.
///
/// `scan()` starts a producer task and returns its stream; `stop()` ends
/// the stream of the scan in progress. Probes already connecting are left
/// to finish or time out on their own.
pub struct PortScanner {
    budget: Arc<ConnectionBudget>,
    concurrency: usize,
    banner_timeout: Duration,
    grab_banners: bool,
    stop: Mutex<CancellationToken>,
}

impl PortScanner {
    pub fn new(budget: Arc<ConnectionBudget>) -> Self {
        Self {
            budget,
            concurrency: DEFAULT_SCAN_CONCURRENCY,
            banner_timeout: Duration::from_millis(300),
            grab_banners: true,
            stop: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn from_config(config: &EngineConfig, budget: Arc<ConnectionBudget>) -> Self {
        Self::new(budget).with_concurrency(config.port_scan_concurrency)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_banner_timeout(mut self, timeout: Duration) -> Self {
        self.banner_timeout = timeout;
        self
    }

    pub fn with_banner_grab(mut self, enabled: bool) -> Self {
        self.grab_banners = enabled;
        self
    }

    /// Probe `ports` on `host`. Results arrive in completion order.
    pub fn scan(&self, host: &str, ports: Vec<u16>, connect_timeout: Duration) -> ResultStream<PortScanResult> {
        let stop = CancellationToken::new();
        *self.stop.lock() = stop.clone();

        let (tx, rx) = mpsc::channel(self.concurrency);
        let run = ScanRun {
            host: host.to_string(),
            ports,
            settings: ProbeSettings {
                connect_timeout,
                banner_timeout: self.banner_timeout,
                grab_banners: self.grab_banners,
            },
            budget: Arc::clone(&self.budget),
            concurrency: self.concurrency,
            stop: stop.clone(),
        };
        let span = info_span!("port_scan", host = %run.host);
        tokio::spawn(run.execute(tx).instrument(span));

        ResultStream::new(rx, stop)
    }

    /// End the scan in progress.
    pub fn stop(&self) {
        self.stop.lock().cancel();
    }
}

struct ScanRun {
    host: String,
    ports: Vec<u16>,
    settings: ProbeSettings,
    budget: Arc<ConnectionBudget>,
    concurrency: usize,
    stop: CancellationToken,
}

impl ScanRun {
    async fn execute(self, tx: mpsc::Sender<PortScanResult>) {
        info!(ports = self.ports.len(), "port scan started");

        let ip = match resolve_host(&self.host).await {
            Ok(ip) => IpAddr::V4(ip),
            Err(e) => {
                warn!(error = %e, "host did not resolve, reporting ports as filtered");
                for &port in &self.ports {
                    if !self.emit(&tx, with_port_name(PortScanResult::new(port, PortState::Filtered))).await {
                        break;
                    }
                }
                info!("port scan stopped");
                return;
            }
        };

        let mut pending = self.ports.iter().copied();
        let mut tasks = JoinSet::new();
        let mut reported = 0usize;

        loop {
            while tasks.len() < self.concurrency && !self.stop.is_cancelled() {
                let Some(port) = pending.next() else { break };
                let budget = Arc::clone(&self.budget);
                let settings = self.settings;
                tasks.spawn(async move { probe_port(SocketAddr::new(ip, port), settings, &budget).await });
            }

            let joined = tokio::select! {
                biased;
                _ = self.stop.cancelled() => {
                    tasks.detach_all();
                    break;
                }
                joined = tasks.join_next() => joined,
            };

            match joined {
                None => break,
                Some(Ok(result)) => {
                    reported += 1;
                    if !self.emit(&tx, result).await {
                        tasks.detach_all();
                        break;
                    }
                }
                Some(Err(e)) => debug!(error = %e, "port probe task failed"),
            }
        }

        info!(reported, stopped = self.stop.is_cancelled(), "port scan stopped");
    }

    /// False once the consumer is gone or the run was stopped.
    async fn emit(&self, tx: &mpsc::Sender<PortScanResult>, result: PortScanResult) -> bool {
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => false,
            sent = tx.send(result) => sent.is_ok(),
        }
    }
}

/// Connect once to `addr` inside a budget slot and classify the port:
/// accepted is open, refused is closed, anything else is filtered.
pub async fn probe_port(addr: SocketAddr, settings: ProbeSettings, budget: &ConnectionBudget) -> PortScanResult {
    let _permit = budget.permit().await;
    let port = addr.port();
    let started = Instant::now();

    match timeout(settings.connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(mut stream)) => {
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            let banner = if settings.grab_banners && wants_banner(port) {
                BannerGrabber::new(settings.banner_timeout).grab(&mut stream).await
            } else {
                None
            };

            let mut result = PortScanResult::new(port, PortState::Open).with_response_time(elapsed_ms);
            if let Some(service) = detect_service(port, banner.as_deref()) {
                result = result.with_service(service.to_string());
            }
            if let Some(banner) = banner {
                result = result.with_banner(banner);
            }
            result
        }
        Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
            with_port_name(PortScanResult::new(port, PortState::Closed))
        }
        Ok(Err(e)) => {
            debug!(%addr, error = %e, "connect failed");
            with_port_name(PortScanResult::new(port, PortState::Filtered))
        }
        Err(_) => with_port_name(PortScanResult::new(port, PortState::Filtered)),
    }
}

fn with_port_name(result: PortScanResult) -> PortScanResult {
    match common_service_name(result.port) {
        Some(name) => result.with_service(name),
        None => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn scanner() -> PortScanner {
        PortScanner::new(Arc::new(ConnectionBudget::new(16)))
    }

    #[tokio::test]
    async fn test_closed_ports_on_localhost() {
        let results = scanner()
            .scan("127.0.0.1", vec![65000, 65001, 65002], Duration::from_millis(500))
            .collect()
            .await;

        assert_eq!(results.len(), 3);
        let mut ports: Vec<u16> = results.iter().map(|r| r.port).collect();
        ports.sort_unstable();
        assert_eq!(ports, vec![65000, 65001, 65002]);
        for r in &results {
            assert!(matches!(r.state, PortState::Closed | PortState::Filtered));
            assert!(r.response_time_ms.is_none());
        }
    }

    #[tokio::test]
    async fn test_listening_port_is_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let results = scanner()
            .scan("localhost", vec![port], Duration::from_secs(1))
            .collect()
            .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].state, PortState::Open);
        assert!(results[0].response_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_unresolvable_host_reports_filtered() {
        let results = scanner()
            .scan("no-such-host.invalid", vec![22, 80], Duration::from_millis(200))
            .collect()
            .await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.state == PortState::Filtered));
        assert_eq!(results[0].service.as_deref(), Some("SSH"));
    }

    #[tokio::test]
    async fn test_stop_ends_the_stream() {
        let scanner = scanner().with_concurrency(1);
        let mut stream = scanner.scan("127.0.0.1", (64000..64500).collect(), Duration::from_millis(200));

        assert!(stream.next().await.is_some());
        scanner.stop();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_probe_holds_a_budget_slot() {
        let budget = ConnectionBudget::new(1);
        let settings = ProbeSettings {
            connect_timeout: Duration::from_millis(300),
            banner_timeout: Duration::from_millis(100),
            grab_banners: false,
        };
        let result = probe_port("127.0.0.1:65003".parse().unwrap(), settings, &budget).await;
        assert_eq!(result.port, 65003);
        assert_eq!(budget.active_count(), 0);
    }
}
