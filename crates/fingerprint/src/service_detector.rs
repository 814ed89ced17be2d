//! Banner-based service detection
//!
//! Looks at the first bytes a service sent (or answered to an HTTP probe)
//! and names the protocol, with product and version where the banner
//! carries them.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ports::common_service_name;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMatch {
    pub service: String,
    pub product: Option<String>,
    pub version: Option<String>,
}

impl ServiceMatch {
    #[must_use]
    pub fn new<S: Into<String>>(service: S) -> Self {
        Self {
            service: service.into(),
            product: None,
            version: None,
        }
    }

    #[must_use]
    pub fn with_product(mut self, product: Option<String>) -> Self {
        self.product = product;
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }
}

/// `SSH`, `SSH (OpenSSH 8.2p1)`, `HTTP (nginx)`.
impl fmt::Display for ServiceMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.service)?;
        match (&self.product, &self.version) {
            (Some(p), Some(v)) => write!(f, " ({p} {v})"),
            (Some(p), None) => write!(f, " ({p})"),
            (None, Some(v)) => write!(f, " ({v})"),
            (None, None) => Ok(()),
        }
    }
}

static VERSION_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?:v|version)?\s*(\d+\.\d+(?:\.\d+)?)").ok());

/// Name the service behind `banner`. `port` breaks ties (HTTP vs HTTPS).
pub fn detect_service_from_banner(banner: &str, port: u16) -> Option<ServiceMatch> {
    let lower = banner.to_lowercase();

    if lower.starts_with("http/") || lower.contains("\nserver:") {
        let service = if port == 443 || port == 8443 { "HTTPS" } else { "HTTP" };
        let (product, version) = http_server(&lower);
        return Some(ServiceMatch::new(service).with_product(product).with_version(version));
    }

    if lower.starts_with("ssh-") {
        let (product, version) = ssh_software(banner);
        return Some(ServiceMatch::new("SSH").with_product(product).with_version(version));
    }

    if lower.starts_with("220") {
        let service = if lower.contains("ftp") {
            "FTP"
        } else if lower.contains("smtp") || lower.contains("mail") {
            "SMTP"
        } else {
            return common_service_name(port).map(ServiceMatch::new);
        };
        return Some(ServiceMatch::new(service).with_version(version_number(&lower)));
    }

    if lower.starts_with("+ok") {
        return Some(ServiceMatch::new("POP3"));
    }
    if lower.starts_with("* ok") {
        let product = lower.contains("dovecot").then(|| "Dovecot".to_string());
        return Some(ServiceMatch::new("IMAP").with_product(product));
    }
    if lower.starts_with("rfb ") {
        let version = lower.split_whitespace().nth(1).map(str::to_string);
        return Some(ServiceMatch::new("VNC").with_version(version));
    }
    if lower.contains("redis") || banner.starts_with("-ERR") || banner.starts_with("-NOAUTH") {
        return Some(ServiceMatch::new("Redis").with_version(version_number(&lower)));
    }
    if lower.contains("mysql") || lower.contains("mariadb") {
        return Some(ServiceMatch::new("MySQL").with_version(version_number(&lower)));
    }
    if lower.contains("login:") || lower.contains("telnet") {
        return Some(ServiceMatch::new("Telnet"));
    }

    None
}

/// Banner first, then the port table.
pub fn detect_service(port: u16, banner: Option<&str>) -> Option<ServiceMatch> {
    banner
        .and_then(|b| detect_service_from_banner(b, port))
        .or_else(|| common_service_name(port).map(ServiceMatch::new))
}

/// `Server: nginx/1.18.0 (Ubuntu)` -> (nginx, 1.18.0)
fn http_server(lower: &str) -> (Option<String>, Option<String>) {
    let Some(idx) = lower.find("server:") else {
        return (None, None);
    };
    let line = lower[idx + "server:".len()..]
        .lines()
        .next()
        .unwrap_or("")
        .trim();
    if line.is_empty() {
        return (None, None);
    }

    let mut parts = line.splitn(2, '/');
    let product = parts.next().map(|p| p.trim().to_string());
    let version = parts
        .next()
        .and_then(|v| v.split_whitespace().next())
        .map(str::to_string);
    (product, version)
}

/// `SSH-2.0-OpenSSH_8.2p1 Ubuntu` -> (OpenSSH, 8.2p1)
fn ssh_software(banner: &str) -> (Option<String>, Option<String>) {
    let first = banner.lines().next().unwrap_or("").trim();
    let software = first.splitn(3, '-').nth(2).unwrap_or("");
    let software = software.split_whitespace().next().unwrap_or("");
    if software.is_empty() {
        return (None, None);
    }

    let mut parts = software.splitn(2, '_');
    let product = parts.next().map(str::to_string);
    let version = parts.next().map(str::to_string);
    (product, version)
}

fn version_number(text: &str) -> Option<String> {
    VERSION_RE
        .as_ref()?
        .captures(text)?
        .get(1)
        .map(|m| m.as_str().to_string())
}
