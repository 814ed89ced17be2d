//! ICMP socket wrapper
//!
//! Prefers an unprivileged datagram ICMP socket (Linux `ping_group_range`,
//! macOS) and falls back to a raw socket. I/O is blocking with a read
//! timeout and runs on the blocking pool. One probe is in flight per socket
//! at a time; open more sockets for parallel probing.

use rand::Rng;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{ErrorKind, Read};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::IcmpError;
use crate::packet::{build_echo_request, header_source, parse_response, IcmpKind, IcmpResponse};

const RECV_BUFFER_LEN: usize = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Kernel-managed echo socket; no privileges, but time-exceeded
    /// messages are not delivered on Linux.
    Datagram,
    Raw,
}

pub struct IcmpSocket {
    socket: Arc<Socket>,
    kind: SocketKind,
    identifier: u16,
    sequence: AtomicU16,
    io: Mutex<()>,
}

impl IcmpSocket {
    /// Datagram socket when permitted, raw socket otherwise.
    pub fn open() -> Result<Self, IcmpError> {
        match Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)) {
            Ok(socket) => Ok(Self::from_socket(socket, SocketKind::Datagram)),
            Err(e) => {
                info!(error = %e, "datagram ICMP socket unavailable, falling back to raw");
                Self::open_raw()
            }
        }
    }

    /// Raw socket only. Needed to observe time-exceeded replies.
    pub fn open_raw() -> Result<Self, IcmpError> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).map_err(|e| {
            if e.kind() == ErrorKind::PermissionDenied {
                IcmpError::NotPermitted
            } else {
                IcmpError::Io(e)
            }
        })?;
        Ok(Self::from_socket(socket, SocketKind::Raw))
    }

    /// Whether any ICMP socket can be opened in this process.
    pub fn is_available() -> bool {
        Self::open().is_ok()
    }

    fn from_socket(socket: Socket, kind: SocketKind) -> Self {
        let mut rng = rand::thread_rng();
        debug!(?kind, "ICMP socket opened");
        Self {
            socket: Arc::new(socket),
            kind,
            identifier: rng.gen(),
            sequence: AtomicU16::new(rng.gen()),
            io: Mutex::new(()),
        }
    }

    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    fn next_sequence(&self) -> u16 {
        self.sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Send one echo request and wait for the matching echo reply.
    pub async fn ping(&self, target: Ipv4Addr, timeout: Duration, payload_size: usize) -> IcmpResponse {
        self.probe(target, None, timeout, payload_size).await
    }

    /// Send one echo request with the given TTL. Answers are either the
    /// target's echo reply or a router's time-exceeded for this sequence.
    pub async fn probe(
        &self,
        target: Ipv4Addr,
        ttl: Option<u32>,
        timeout: Duration,
        payload_size: usize,
    ) -> IcmpResponse {
        let _io = self.io.lock().await;
        let sequence = self.next_sequence();
        let exchange = Exchange {
            socket: Arc::clone(&self.socket),
            target,
            ttl,
            sequence,
            identifier: self.identifier,
            timeout,
            payload_size,
        };

        match tokio::task::spawn_blocking(move || exchange.run()).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "ICMP probe task failed");
                IcmpResponse::error(None, 0.0)
            }
        }
    }
}

/// One send/receive round on the blocking pool.
struct Exchange {
    socket: Arc<Socket>,
    target: Ipv4Addr,
    ttl: Option<u32>,
    sequence: u16,
    identifier: u16,
    timeout: Duration,
    payload_size: usize,
}

impl Exchange {
    fn run(self) -> IcmpResponse {
        if let Some(ttl) = self.ttl {
            if let Err(e) = self.socket.set_ttl(ttl) {
                debug!(ttl, error = %e, "failed to set TTL");
                return IcmpResponse::error(None, 0.0);
            }
        }

        let packet = build_echo_request(self.sequence, self.payload_size, self.identifier);
        let addr = SockAddr::from(SocketAddrV4::new(self.target, 0));
        let started = Instant::now();

        match self.socket.send_to(&packet, &addr) {
            Ok(n) if n == packet.len() => {}
            Ok(n) => {
                debug!(target = %self.target, sent = n, expected = packet.len(), "short ICMP write");
                return IcmpResponse::error(None, 0.0);
            }
            Err(e) => {
                debug!(target = %self.target, error = %e, "ICMP send failed");
                return IcmpResponse::error(None, 0.0);
            }
        }

        let deadline = started + self.timeout;
        let mut buf = [0u8; RECV_BUFFER_LEN];
        loop {
            let now = Instant::now();
            if now >= deadline {
                return IcmpResponse::timeout(elapsed_ms(started));
            }
            if let Err(e) = self.socket.set_read_timeout(Some(deadline - now)) {
                debug!(error = %e, "failed to set read timeout");
                return IcmpResponse::error(None, elapsed_ms(started));
            }

            let n = match (&*self.socket).read(&mut buf) {
                Ok(n) => n,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return IcmpResponse::timeout(elapsed_ms(started));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(error = %e, "ICMP receive failed");
                    return IcmpResponse::error(None, elapsed_ms(started));
                }
            };

            let bytes = &buf[..n];
            // Datagram sockets strip the IP header and only deliver replies
            // from the address we sent to.
            let source = header_source(bytes).unwrap_or(self.target).to_string();
            let response = parse_response(bytes, Some(source), elapsed_ms(started));

            let matched = match &response.kind {
                IcmpKind::EchoReply { sequence } => *sequence == self.sequence,
                IcmpKind::TimeExceeded {
                    original_sequence, ..
                } => *original_sequence == self.sequence,
                _ => false,
            };
            if matched {
                return response;
            }
            // Someone else's reply, or our own request looped back on a raw
            // socket; keep waiting until the deadline.
        }
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}
