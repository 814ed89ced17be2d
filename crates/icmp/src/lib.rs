//! ICMP echo probing
//!
//! Packet codec for echo requests and replies plus a socket wrapper that
//! sends TTL-limited echoes for ping and traceroute.

pub mod error;
pub mod packet;
pub mod socket;

pub use error::IcmpError;
pub use packet::{
    build_echo_request, checksum, parse_response, IcmpKind, IcmpResponse, DEFAULT_PAYLOAD_SIZE,
    ICMP_HEADER_LEN, MAX_PAYLOAD_SIZE,
};
pub use socket::{IcmpSocket, SocketKind};
