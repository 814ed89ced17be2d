//! Ping service

use parking_lot::Mutex;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use lanscope_common::{EngineConfig, PingResult};
use lanscope_icmp::{IcmpKind, IcmpSocket, ICMP_HEADER_LEN};
use lanscope_orchestrator::{ConnectionBudget, ResultStream};
use lanscope_target_resolver::resolve_host;

use crate::tcp::{tcp_probe, TcpProbe};

const DEFAULT_FALLBACK_PORT: u16 = 80;
/// Reported size for connect-timed replies.
const TCP_REPLY_SIZE: usize = 64;

/// Sends `count` echo requests (or TCP connects) one interval apart.
pub struct PingService {
    budget: Arc<ConnectionBudget>,
    interval: Duration,
    payload_size: usize,
    fallback_port: u16,
    use_icmp: bool,
    stop: Mutex<CancellationToken>,
}

impl PingService {
    pub fn new(budget: Arc<ConnectionBudget>) -> Self {
        Self {
            budget,
            interval: Duration::from_secs(1),
            payload_size: lanscope_icmp::DEFAULT_PAYLOAD_SIZE,
            fallback_port: DEFAULT_FALLBACK_PORT,
            use_icmp: true,
            stop: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn from_config(config: &EngineConfig, budget: Arc<ConnectionBudget>) -> Self {
        Self::new(budget)
            .with_interval(config.ping_interval)
            .with_payload_size(config.ping_payload_size)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Capped at the largest payload one IPv4 datagram can carry.
    pub fn with_payload_size(mut self, size: usize) -> Self {
        self.payload_size = size.min(lanscope_icmp::MAX_PAYLOAD_SIZE);
        self
    }

    /// Port used when timing TCP connects instead of ICMP echoes.
    pub fn with_fallback_port(mut self, port: u16) -> Self {
        self.fallback_port = port;
        self
    }

    /// `false` skips ICMP and always times TCP connects.
    pub fn with_icmp(mut self, enabled: bool) -> Self {
        self.use_icmp = enabled;
        self
    }

    /// One result per sequence number `1..=count`.
    pub fn ping(&self, host: &str, count: u16, timeout: Duration) -> ResultStream<PingResult> {
        let stop = CancellationToken::new();
        *self.stop.lock() = stop.clone();

        let (tx, rx) = mpsc::channel(usize::from(count.max(1)).min(64));
        let run = PingRun {
            host: host.to_string(),
            count,
            timeout,
            interval: self.interval,
            payload_size: self.payload_size,
            fallback_port: self.fallback_port,
            use_icmp: self.use_icmp,
            budget: Arc::clone(&self.budget),
            stop: stop.clone(),
        };
        let span = info_span!("ping", host = %run.host);
        tokio::spawn(run.execute(tx).instrument(span));

        ResultStream::new(rx, stop)
    }

    pub fn stop(&self) {
        self.stop.lock().cancel();
    }
}

enum Method {
    Icmp(IcmpSocket),
    Tcp(u16),
}

struct PingRun {
    host: String,
    count: u16,
    timeout: Duration,
    interval: Duration,
    payload_size: usize,
    fallback_port: u16,
    use_icmp: bool,
    budget: Arc<ConnectionBudget>,
    stop: CancellationToken,
}

impl PingRun {
    async fn execute(self, tx: mpsc::Sender<PingResult>) {
        let target = match resolve_host(&self.host).await {
            Ok(ip) => Some(ip),
            Err(e) => {
                debug!(error = %e, "host did not resolve");
                None
            }
        };
        let method = self.method();
        info!(count = self.count, icmp = matches!(method, Method::Icmp(_)), "ping started");

        let mut sent = 0u16;
        for sequence in 1..=self.count {
            if self.stop.is_cancelled() {
                break;
            }

            let result = match target {
                Some(ip) => self.attempt(&method, ip, sequence).await,
                None => PingResult::timeout(sequence, self.host.as_str(), 0.0),
            };
            sent += 1;

            let delivered = tokio::select! {
                biased;
                _ = self.stop.cancelled() => false,
                r = tx.send(result) => r.is_ok(),
            };
            if !delivered {
                break;
            }

            if sequence < self.count {
                tokio::select! {
                    _ = self.stop.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
        }

        info!(sent, stopped = self.stop.is_cancelled(), "ping stopped");
    }

    fn method(&self) -> Method {
        if self.use_icmp {
            match IcmpSocket::open() {
                Ok(socket) => return Method::Icmp(socket),
                Err(e) => info!(error = %e, port = self.fallback_port, "ICMP unavailable, timing TCP connects"),
            }
        }
        Method::Tcp(self.fallback_port)
    }

    async fn attempt(&self, method: &Method, ip: Ipv4Addr, sequence: u16) -> PingResult {
        let host = self.host.as_str();
        let address = Some(ip.to_string());

        match method {
            Method::Icmp(socket) => {
                let response = {
                    let _permit = self.budget.permit().await;
                    socket.ping(ip, self.timeout, self.payload_size).await
                };
                match response.kind {
                    IcmpKind::EchoReply { .. } => PingResult::reply(sequence, host, response.rtt_ms)
                        .with_ip(address)
                        .with_size(self.payload_size + ICMP_HEADER_LEN),
                    _ => PingResult::timeout(sequence, host, response.rtt_ms).with_ip(address),
                }
            }
            Method::Tcp(port) => {
                let addr = SocketAddr::from((ip, *port));
                match tcp_probe(addr, self.timeout, &self.budget).await {
                    TcpProbe::Connected(ms) | TcpProbe::Refused(ms) => {
                        PingResult::reply(sequence, host, ms)
                            .with_ip(address)
                            .with_size(TCP_REPLY_SIZE)
                    }
                    TcpProbe::Timeout | TcpProbe::Error => {
                        let waited = self.timeout.as_secs_f64() * 1000.0;
                        PingResult::timeout(sequence, host, waited).with_ip(address)
                    }
                }
            }
        }
    }
}
