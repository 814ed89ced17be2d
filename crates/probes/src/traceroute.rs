//! Traceroute service
//!
//! With a raw ICMP socket each hop is a batch of TTL-limited echo requests;
//! routers answer with time-exceeded and the destination with an echo
//! reply. Without one, reachability is estimated by TCP connects with
//! growing timeouts, which only ever names the destination itself.

use parking_lot::Mutex;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use lanscope_common::{EngineConfig, TracerouteHop};
use lanscope_icmp::{IcmpKind, IcmpSocket};
use lanscope_orchestrator::{ConnectionBudget, ResultStream};
use lanscope_target_resolver::{resolve_host, NameResolver};

use crate::tcp::tcp_probe;

const DEFAULT_FALLBACK_PORT: u16 = 443;
const PROBE_PAYLOAD_SIZE: usize = 32;
const REVERSE_DNS_TIMEOUT: Duration = Duration::from_secs(1);
/// The TCP estimate never spends more than this many attempts.
const MAX_TCP_ATTEMPTS: u8 = 30;
const MIN_TCP_HOP_TIMEOUT: Duration = Duration::from_millis(10);

pub struct TracerouteService {
    budget: Arc<ConnectionBudget>,
    probes_per_hop: usize,
    fallback_port: u16,
    use_icmp: bool,
    reverse_dns: bool,
    stop: Mutex<CancellationToken>,
}

impl TracerouteService {
    pub fn new(budget: Arc<ConnectionBudget>) -> Self {
        Self {
            budget,
            probes_per_hop: 3,
            fallback_port: DEFAULT_FALLBACK_PORT,
            use_icmp: true,
            reverse_dns: true,
            stop: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn from_config(config: &EngineConfig, budget: Arc<ConnectionBudget>) -> Self {
        Self::new(budget).with_probes_per_hop(config.traceroute_probes_per_hop)
    }

    pub fn with_probes_per_hop(mut self, probes: usize) -> Self {
        self.probes_per_hop = probes.max(1);
        self
    }

    pub fn with_fallback_port(mut self, port: u16) -> Self {
        self.fallback_port = port;
        self
    }

    pub fn with_icmp(mut self, enabled: bool) -> Self {
        self.use_icmp = enabled;
        self
    }

    /// Look up PTR names for responding routers.
    pub fn with_reverse_dns(mut self, enabled: bool) -> Self {
        self.reverse_dns = enabled;
        self
    }

    /// Hops in increasing order, starting at 1.
    pub fn trace(&self, host: &str, max_hops: u8, timeout: Duration) -> ResultStream<TracerouteHop> {
        let stop = CancellationToken::new();
        *self.stop.lock() = stop.clone();

        let (tx, rx) = mpsc::channel(usize::from(max_hops.max(1)) + 1);
        let run = TraceRun {
            host: host.to_string(),
            max_hops: max_hops.max(1),
            timeout,
            probes_per_hop: self.probes_per_hop,
            fallback_port: self.fallback_port,
            use_icmp: self.use_icmp,
            reverse_dns: self.reverse_dns,
            budget: Arc::clone(&self.budget),
            stop: stop.clone(),
            tx,
        };
        let span = info_span!("traceroute", host = %run.host);
        tokio::spawn(run.execute().instrument(span));

        ResultStream::new(rx, stop)
    }

    pub fn stop(&self) {
        self.stop.lock().cancel();
    }
}

struct TraceRun {
    host: String,
    max_hops: u8,
    timeout: Duration,
    probes_per_hop: usize,
    fallback_port: u16,
    use_icmp: bool,
    reverse_dns: bool,
    budget: Arc<ConnectionBudget>,
    stop: CancellationToken,
    tx: mpsc::Sender<TracerouteHop>,
}

impl TraceRun {
    async fn execute(self) {
        let target = match resolve_host(&self.host).await {
            Ok(ip) => ip,
            Err(e) => {
                warn!(error = %e, "host did not resolve");
                return;
            }
        };

        let socket = if self.use_icmp {
            // Datagram ICMP sockets never see time-exceeded, so only raw will do.
            match IcmpSocket::open_raw() {
                Ok(socket) => Some(socket),
                Err(e) => {
                    info!(error = %e, port = self.fallback_port, "raw ICMP unavailable, estimating with TCP");
                    None
                }
            }
        } else {
            None
        };

        info!(%target, max_hops = self.max_hops, icmp = socket.is_some(), "traceroute started");
        let hops = match socket {
            Some(socket) => self.trace_icmp(&socket, target).await,
            None => self.trace_tcp(target).await,
        };
        info!(hops, stopped = self.stop.is_cancelled(), "traceroute stopped");
    }

    async fn trace_icmp(&self, socket: &IcmpSocket, target: Ipv4Addr) -> u8 {
        let names = self
            .reverse_dns
            .then(|| NameResolver::from_system(REVERSE_DNS_TIMEOUT));
        let mut emitted = 0;

        for ttl in 1..=self.max_hops {
            let mut responder: Option<String> = None;
            let mut times = Vec::with_capacity(self.probes_per_hop);
            let mut reached = false;

            for _ in 0..self.probes_per_hop {
                if self.stop.is_cancelled() {
                    return emitted;
                }
                let response = {
                    let _permit = self.budget.permit().await;
                    socket
                        .probe(target, Some(u32::from(ttl)), self.timeout, PROBE_PAYLOAD_SIZE)
                        .await
                };
                match response.kind {
                    IcmpKind::EchoReply { .. } => {
                        reached = true;
                        times.push(response.rtt_ms);
                        responder = responder.or(response.source_ip);
                    }
                    IcmpKind::TimeExceeded { router_ip, .. } => {
                        times.push(response.rtt_ms);
                        responder = responder.or(Some(router_ip));
                    }
                    IcmpKind::Timeout | IcmpKind::Error => {}
                }
            }

            let hop = match responder {
                Some(ip) => {
                    let hostname = match (&names, ip.parse::<Ipv4Addr>()) {
                        (Some(names), Ok(addr)) => names.reverse(addr).await,
                        _ => None,
                    };
                    TracerouteHop::reached(ttl, ip, times).with_hostname(hostname)
                }
                None => TracerouteHop::timed_out(ttl),
            };

            if !self.emit(hop).await {
                return emitted;
            }
            emitted = ttl;
            if reached {
                break;
            }
        }
        emitted
    }

    /// Connect attempts with timeouts growing linearly up to the full
    /// timeout; the first answer (accept or reset) is the destination. If
    /// none answers, one last attempt gets the full timeout.
    async fn trace_tcp(&self, target: Ipv4Addr) -> u8 {
        let addr = SocketAddr::from((target, self.fallback_port));
        let attempts = self.max_hops.min(MAX_TCP_ATTEMPTS);
        let hostname = (self.host != target.to_string()).then(|| self.host.clone());

        for hop in 1..=attempts {
            if self.stop.is_cancelled() {
                return hop - 1;
            }
            let wait = self
                .timeout
                .mul_f64(f64::from(hop) / f64::from(attempts))
                .max(MIN_TCP_HOP_TIMEOUT);

            let probe = tcp_probe(addr, wait, &self.budget).await;
            debug!(hop, ?wait, ?probe, "tcp hop");

            let record = match probe.rtt_ms() {
                Some(ms) => TracerouteHop::reached(hop, target.to_string(), vec![ms])
                    .with_hostname(hostname.clone()),
                None => TracerouteHop::timed_out(hop),
            };
            let answered = !record.is_timeout;
            if !self.emit(record).await {
                return hop;
            }
            if answered {
                return hop;
            }
        }

        if self.stop.is_cancelled() {
            return attempts;
        }
        let hop = attempts + 1;
        let record = match tcp_probe(addr, self.timeout, &self.budget).await.rtt_ms() {
            Some(ms) => TracerouteHop::reached(hop, target.to_string(), vec![ms]),
            None => TracerouteHop {
                ip: Some(target.to_string()),
                ..TracerouteHop::timed_out(hop)
            },
        };
        self.emit(record.with_hostname(hostname)).await;
        hop
    }

    async fn emit(&self, hop: TracerouteHop) -> bool {
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => false,
            sent = self.tx.send(hop) => sent.is_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn tcp_tracer(port: u16) -> TracerouteService {
        TracerouteService::new(Arc::new(ConnectionBudget::new(4)))
            .with_icmp(false)
            .with_reverse_dns(false)
            .with_fallback_port(port)
    }

    #[tokio::test]
    async fn test_tcp_estimate_reaches_listener_on_first_hop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let hops = tcp_tracer(port)
            .trace("127.0.0.1", 5, Duration::from_secs(1))
            .collect()
            .await;

        assert_eq!(hops.len(), 1);
        assert_eq!(hops[0].hop, 1);
        assert!(!hops[0].is_timeout);
        assert_eq!(hops[0].ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(hops[0].times_ms.len(), 1);
        assert!(hops[0].hostname.is_none());
    }

    #[tokio::test]
    async fn test_hostname_kept_when_tracing_by_name() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let hops = tcp_tracer(port)
            .trace("localhost", 3, Duration::from_secs(1))
            .collect()
            .await;

        assert_eq!(hops.len(), 1);
        assert_eq!(hops[0].hostname.as_deref(), Some("localhost"));
        assert_eq!(hops[0].display_address(), "localhost");
    }

    #[tokio::test]
    async fn test_unresolvable_host_yields_nothing() {
        let hops = tcp_tracer(443)
            .trace("no-such-host.invalid", 3, Duration::from_millis(100))
            .collect()
            .await;
        assert!(hops.is_empty());
    }

    #[tokio::test]
    async fn test_stopped_before_start_yields_nothing() {
        let tracer = tcp_tracer(443);
        let stream = tracer.trace("127.0.0.1", 3, Duration::from_millis(100));
        tracer.stop();
        assert!(stream.collect().await.is_empty());
    }
}
