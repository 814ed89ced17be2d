//! TCP connect port scanner
//!
//! Streams one `PortScanResult` per requested port, in completion order,
//! with every connection attempt admitted through the shared
//! `ConnectionBudget`.

mod banner;
mod scanner;

pub use banner::BannerGrabber;
pub use scanner::{probe_port, PortScanner, ProbeSettings, DEFAULT_SCAN_CONCURRENCY};
