//! TCP connect timing, the fallback when ICMP is unavailable

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;

use lanscope_orchestrator::ConnectionBudget;

/// Outcome of a single connect attempt. Times are milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TcpProbe {
    Connected(f64),
    /// The host answered with a reset, so it is still reachable.
    Refused(f64),
    Timeout,
    Error,
}

impl TcpProbe {
    /// Round-trip time when the host answered either way.
    pub fn rtt_ms(&self) -> Option<f64> {
        match self {
            TcpProbe::Connected(ms) | TcpProbe::Refused(ms) => Some(*ms),
            TcpProbe::Timeout | TcpProbe::Error => None,
        }
    }
}

/// Time one connect to `addr` inside a budget slot.
pub async fn tcp_probe(addr: SocketAddr, wait: Duration, budget: &ConnectionBudget) -> TcpProbe {
    let _permit = budget.permit().await;
    let started = Instant::now();
    let outcome = timeout(wait, TcpStream::connect(addr)).await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    match outcome {
        Ok(Ok(_stream)) => TcpProbe::Connected(elapsed_ms),
        Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => TcpProbe::Refused(elapsed_ms),
        Ok(Err(_)) => TcpProbe::Error,
        Err(_) => TcpProbe::Timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connected_and_refused_both_answer() {
        let budget = ConnectionBudget::new(2);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let open = tcp_probe(addr, Duration::from_secs(1), &budget).await;
        assert!(matches!(open, TcpProbe::Connected(_)));
        assert!(open.rtt_ms().is_some());

        drop(listener);
        let closed = tcp_probe(addr, Duration::from_secs(1), &budget).await;
        assert!(matches!(closed, TcpProbe::Refused(_) | TcpProbe::Error));
        assert_eq!(budget.active_count(), 0);
    }
}
