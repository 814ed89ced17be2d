//! Lanscope Probes - ping and traceroute
//!
//! Both services prefer ICMP and fall back to TCP connect timing when the
//! process cannot open an ICMP socket. Results stream out one attempt (or
//! hop) at a time; `stop()` ends the run in progress.

mod ping;
mod stats;
mod tcp;
mod traceroute;

pub use ping::PingService;
pub use stats::calculate_statistics;
pub use tcp::{tcp_probe, TcpProbe};
pub use traceroute::TracerouteService;
