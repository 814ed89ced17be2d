//! Fingerprint - service identification for scanned ports
//!
//! A static table of well-known ports plus banner inspection that can
//! refine or override the table's guess.

mod ports;
mod service_detector;

pub use ports::common_service_name;
pub use service_detector::{detect_service, detect_service_from_banner, ServiceMatch};
