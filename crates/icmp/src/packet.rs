//! ICMP echo packet building and reply parsing
//!
//! Pure functions over byte slices. Parsing never panics: anything short,
//! truncated or unexpected comes back as `IcmpKind::Error`.

/// ICMP type constants
pub mod icmp_type {
    pub const ECHO_REPLY: u8 = 0;
    pub const ECHO_REQUEST: u8 = 8;
    pub const TIME_EXCEEDED: u8 = 11;
}

pub const ICMP_HEADER_LEN: usize = 8;
pub const DEFAULT_PAYLOAD_SIZE: usize = 56;
/// Largest payload that fits one IPv4 datagram after the IP and ICMP headers.
pub const MAX_PAYLOAD_SIZE: usize = 65_507;

/// Length of the original IPv4 header quoted in a time-exceeded message
/// when it cannot be read from the quote itself.
const QUOTED_IP_HEADER_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IcmpKind {
    EchoReply {
        sequence: u16,
    },
    TimeExceeded {
        router_ip: String,
        original_sequence: u16,
    },
    Timeout,
    Error,
}

/// One classified reply (or the lack of one).
#[derive(Debug, Clone, PartialEq)]
pub struct IcmpResponse {
    pub kind: IcmpKind,
    pub source_ip: Option<String>,
    /// Milliseconds between send and receive; the waited time for timeouts.
    pub rtt_ms: f64,
}

impl IcmpResponse {
    pub fn timeout(waited_ms: f64) -> Self {
        Self {
            kind: IcmpKind::Timeout,
            source_ip: None,
            rtt_ms: waited_ms,
        }
    }

    pub fn error(source_ip: Option<String>, rtt_ms: f64) -> Self {
        Self {
            kind: IcmpKind::Error,
            source_ip,
            rtt_ms,
        }
    }

    pub fn is_echo_reply(&self) -> bool {
        matches!(self.kind, IcmpKind::EchoReply { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, IcmpKind::Timeout)
    }
}

/// RFC 1071 internet checksum over big-endian 16-bit words.
#[inline]
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum = 0u64;
    let mut chunks = data.chunks_exact(2);

    for word in &mut chunks {
        sum += u64::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u64::from(*last) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// Echo request: 8-byte header plus `payload_size` bytes of a 0..=255
/// counting pattern, checksum filled in.
pub fn build_echo_request(sequence: u16, payload_size: usize, identifier: u16) -> Vec<u8> {
    let mut packet = vec![0u8; ICMP_HEADER_LEN + payload_size];

    packet[0] = icmp_type::ECHO_REQUEST;
    packet[1] = 0; // code
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    for (i, byte) in packet[ICMP_HEADER_LEN..].iter_mut().enumerate() {
        *byte = (i & 0xFF) as u8;
    }

    let sum = checksum(&packet);
    packet[2..4].copy_from_slice(&sum.to_be_bytes());
    packet
}

/// Classify a received buffer.
///
/// Raw sockets (and some platforms' datagram sockets) deliver the IPv4
/// header in front of the ICMP message; it is skipped when the version
/// nibble says so.
pub fn parse_response(buf: &[u8], source_ip: Option<String>, rtt_ms: f64) -> IcmpResponse {
    let icmp = match strip_ip_header(buf) {
        Some(icmp) if icmp.len() >= ICMP_HEADER_LEN => icmp,
        _ => return IcmpResponse::error(source_ip, rtt_ms),
    };

    let kind = match icmp[0] {
        icmp_type::ECHO_REPLY => IcmpKind::EchoReply {
            sequence: u16::from_be_bytes([icmp[6], icmp[7]]),
        },
        icmp_type::TIME_EXCEEDED => IcmpKind::TimeExceeded {
            router_ip: source_ip.clone().unwrap_or_else(|| "*".to_string()),
            original_sequence: quoted_sequence(icmp).unwrap_or(0),
        },
        _ => IcmpKind::Error,
    };

    IcmpResponse {
        kind,
        source_ip,
        rtt_ms,
    }
}

/// Source address from a leading IPv4 header, if the buffer carries one.
pub fn header_source(buf: &[u8]) -> Option<std::net::Ipv4Addr> {
    if buf.len() >= 20 && buf[0] >> 4 == 4 {
        Some(std::net::Ipv4Addr::new(buf[12], buf[13], buf[14], buf[15]))
    } else {
        None
    }
}

fn strip_ip_header(buf: &[u8]) -> Option<&[u8]> {
    if buf.len() < ICMP_HEADER_LEN {
        return None;
    }
    if buf[0] >> 4 == 4 {
        let ihl = (buf[0] & 0x0F) as usize * 4;
        buf.get(ihl..)
    } else {
        Some(buf)
    }
}

/// Sequence of the echo request quoted after a time-exceeded header.
fn quoted_sequence(icmp: &[u8]) -> Option<u16> {
    let quoted = icmp.get(ICMP_HEADER_LEN..)?;
    let ihl = match quoted.first() {
        Some(b) if b >> 4 == 4 && (b & 0x0F) >= 5 => (b & 0x0F) as usize * 4,
        _ => QUOTED_IP_HEADER_LEN,
    };
    let seq = quoted.get(ihl + 6..ihl + 8)?;
    Some(u16::from_be_bytes([seq[0], seq[1]]))
}
