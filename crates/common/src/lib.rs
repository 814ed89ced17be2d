//! Lanscope Common - shared data model for the probing engine
//!
//! Device records, probe results, the per-scan context, engine
//! configuration and a handful of IPv4 helpers used across the workspace.

pub mod config;
pub mod error;
pub mod net;
pub mod traits;
pub mod types;

pub use config::{EngineConfig, MAX_PING_PAYLOAD_SIZE};
pub use error::{LanscopeError, LanscopeResult};
pub use traits::DeviceProvider;
pub use types::{
    DeviceSource, DiscoveredDevice, PingResult, PingStatistics, PortScanResult, PortState,
    ScanContext, TracerouteHop,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
