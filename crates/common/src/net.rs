//! IPv4 helpers shared by phases and providers

use std::net::Ipv4Addr;

/// Numeric ordering key for a dotted-quad address. Anything that is not a
/// valid IPv4 address sorts first.
#[inline]
#[must_use]
pub fn ip_sort_key(ip: &str) -> u32 {
    ip.parse::<Ipv4Addr>().map(u32::from).unwrap_or(0)
}

/// Strict dotted-decimal check (no leading zeros, exactly four octets).
#[must_use]
pub fn is_valid_ipv4(value: &str) -> bool {
    let mut parts = 0;
    for part in value.split('.') {
        parts += 1;
        if parts > 4 || part.is_empty() || part.len() > 3 {
            return false;
        }
        if part.len() > 1 && part.starts_with('0') {
            return false;
        }
        if part.parse::<u8>().is_err() {
            return false;
        }
    }
    parts == 4
}

/// Strip a zone-ID suffix (`%en0`) and keep the address only if it is IPv4.
#[must_use]
pub fn cleaned_ipv4(host: &str) -> Option<String> {
    let cleaned = host.split('%').next().unwrap_or(host);
    is_valid_ipv4(cleaned).then(|| cleaned.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_key_is_numeric() {
        assert!(ip_sort_key("192.168.1.2") < ip_sort_key("192.168.1.10"));
        assert!(ip_sort_key("192.168.1.10") < ip_sort_key("192.168.1.100"));
        assert_eq!(ip_sort_key("not-an-ip"), 0);
    }

    #[test]
    fn test_validates_dotted_quads() {
        assert!(is_valid_ipv4("10.0.0.1"));
        assert!(is_valid_ipv4("0.0.0.0"));
        assert!(!is_valid_ipv4("10.0.0"));
        assert!(!is_valid_ipv4("10.0.0.256"));
        assert!(!is_valid_ipv4("10.00.0.1"));
        assert!(!is_valid_ipv4("10.0.0.1.5"));
        assert!(!is_valid_ipv4("fe80::1"));
    }

    #[test]
    fn test_strips_zone_id() {
        assert_eq!(cleaned_ipv4("192.168.1.4%en0").as_deref(), Some("192.168.1.4"));
        assert_eq!(cleaned_ipv4("fe80::1%en0"), None);
    }
}
