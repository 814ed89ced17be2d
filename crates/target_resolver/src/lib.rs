//! Target Resolver - subnet expansion, host and name resolution
//!
//! Turns user input into scan targets. Supported token forms in a
//! comma-separated target string:
//! - single IPv4 address: "192.168.1.20"
//! - CIDR: "192.168.1.0/24"
//! - range: "192.168.1.1-192.168.1.10"
//! - hostname: "printer.local"

use anyhow::{bail, Context, Result};
use ipnet::Ipv4Net;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs, UdpSocket};
use std::time::Duration;
use tracing::debug;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

use lanscope_common::ScanContext;

/// Expansion guard for a single CIDR or range token.
pub const MAX_HOSTS: u64 = 4096;
/// Set to `1` to lift `MAX_HOSTS`.
pub const ALLOW_LARGE_CIDR_ENV: &str = "LANSCOPE_ALLOW_LARGE_CIDR";

/// Resolved targets: the host list to probe plus the networks they came
/// from, which define subnet membership.
#[derive(Debug, Clone, Default)]
pub struct ResolvedTargets {
    pub hosts: Vec<Ipv4Addr>,
    pub networks: Vec<Ipv4Net>,
}

impl ResolvedTargets {
    /// Freeze into a scan context. Membership is "inside one of the
    /// networks, or explicitly listed".
    pub fn into_context(self, local_ip: Option<Ipv4Addr>) -> ScanContext {
        let listed: HashSet<Ipv4Addr> = self.hosts.iter().copied().collect();
        let networks = self.networks;
        let hosts = self.hosts.iter().map(Ipv4Addr::to_string).collect();

        ScanContext::new(
            hosts,
            move |ip: &str| match ip.parse::<Ipv4Addr>() {
                Ok(addr) => listed.contains(&addr) || networks.iter().any(|n| n.contains(&addr)),
                Err(_) => false,
            },
            local_ip.map(|ip| ip.to_string()),
        )
    }

    fn push(&mut self, seen: &mut HashSet<Ipv4Addr>, ip: Ipv4Addr) {
        if seen.insert(ip) {
            self.hosts.push(ip);
        }
    }
}

pub struct TargetResolver;

impl TargetResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a comma-separated target string. Hostnames are resolved on
    /// the blocking pool.
    pub async fn resolve_targets(targets: &str) -> Result<ResolvedTargets> {
        if targets.trim().is_empty() {
            bail!("No targets specified");
        }

        let allow_large = large_cidr_allowed();
        let mut resolved = ResolvedTargets::default();
        let mut seen = HashSet::new();
        let mut hostnames = Vec::new();

        for token in targets.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if let Ok(net) = token.parse::<Ipv4Net>() {
                check_host_limit(token, host_count(&net), allow_large)?;
                for addr in net.hosts() {
                    resolved.push(&mut seen, addr);
                }
                resolved.networks.push(net);
                continue;
            }

            if let Ok(ip) = token.parse::<IpAddr>() {
                if let IpAddr::V4(v4) = ip {
                    resolved.push(&mut seen, v4);
                }
                continue;
            }

            if token.contains('-') && token.starts_with(|c: char| c.is_ascii_digit()) {
                let (start, end) = parse_ip_range(token)?;
                check_host_limit(token, u64::from(u32::from(end)) - u64::from(u32::from(start)) + 1, allow_large)?;
                for v in u32::from(start)..=u32::from(end) {
                    resolved.push(&mut seen, Ipv4Addr::from(v));
                }
                continue;
            }

            hostnames.push(token.to_string());
        }

        for host in hostnames {
            match resolve_host(&host).await {
                Ok(ip) => resolved.push(&mut seen, ip),
                Err(e) => debug!(host, error = %e, "skipping unresolvable target"),
            }
        }

        if resolved.hosts.is_empty() {
            bail!("No valid IPv4 addresses found in targets");
        }
        Ok(resolved)
    }

    /// Context for the `/prefix` network around the local address, the
    /// default when no targets are given.
    pub fn local_context(local_ip: Ipv4Addr, prefix: u8) -> Result<ScanContext> {
        let net = Ipv4Net::new(local_ip, prefix)
            .with_context(|| format!("Invalid prefix length /{prefix}"))?
            .trunc();
        check_host_limit(&net.to_string(), host_count(&net), large_cidr_allowed())?;

        let resolved = ResolvedTargets {
            hosts: net.hosts().collect(),
            networks: vec![net],
        };
        Ok(resolved.into_context(Some(local_ip)))
    }
}

impl Default for TargetResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn large_cidr_allowed() -> bool {
    std::env::var(ALLOW_LARGE_CIDR_ENV)
        .map(|v| v == "1")
        .unwrap_or(false)
}

fn host_count(net: &Ipv4Net) -> u64 {
    1u64 << (32 - u32::from(net.prefix_len()))
}

fn check_host_limit(token: &str, count: u64, allow_large: bool) -> Result<()> {
    if count > MAX_HOSTS && !allow_large {
        bail!(
            "{token} expands to {count} hosts which exceeds the allowed limit of {MAX_HOSTS}. \
             Set {ALLOW_LARGE_CIDR_ENV}=1 to override."
        );
    }
    Ok(())
}

fn parse_ip_range(range: &str) -> Result<(Ipv4Addr, Ipv4Addr)> {
    let (start, end) = range
        .split_once('-')
        .with_context(|| format!("Invalid IP range: {range}"))?;
    let start: Ipv4Addr = start
        .trim()
        .parse()
        .with_context(|| format!("Invalid start IP: {start}"))?;
    let end: Ipv4Addr = end
        .trim()
        .parse()
        .with_context(|| format!("Invalid end IP: {end}"))?;
    if start > end {
        bail!("Invalid IP range: start > end");
    }
    Ok((start, end))
}

/// The IPv4 address this machine would use to reach the internet. No
/// packet is sent; connecting a UDP socket only selects a route.
pub fn detect_local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9)).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

/// Resolve a literal address or hostname to its first IPv4 address.
pub async fn resolve_host(host: &str) -> Result<Ipv4Addr> {
    let host = host.trim();
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(ip);
    }

    let name = host.to_string();
    let addrs = tokio::task::spawn_blocking(move || (name.as_str(), 0).to_socket_addrs())
        .await
        .context("Blocking DNS resolution failed")?
        .with_context(|| format!("Could not resolve {host}"))?;

    addrs
        .filter_map(|a| match a.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .next()
        .with_context(|| format!("{host} has no IPv4 address"))
}

/// PTR lookups through the system's configured resolvers.
#[derive(Clone)]
pub struct NameResolver {
    inner: TokioAsyncResolver,
}

impl NameResolver {
    /// System configuration, one attempt per query with `timeout`.
    pub fn from_system(timeout: Duration) -> Self {
        let (config, mut opts) = trust_dns_resolver::system_conf::read_system_conf()
            .unwrap_or_else(|e| {
                debug!(error = %e, "no system resolver config, using defaults");
                (ResolverConfig::default(), ResolverOpts::default())
            });
        opts.timeout = timeout;
        opts.attempts = 1;
        Self {
            inner: TokioAsyncResolver::tokio(config, opts),
        }
    }

    /// First PTR name for `ip`, without the trailing root dot.
    pub async fn reverse(&self, ip: Ipv4Addr) -> Option<String> {
        let lookup = self.inner.reverse_lookup(IpAddr::V4(ip)).await.ok()?;
        let name = lookup.iter().next()?.to_string();
        let name = name.trim_end_matches('.');
        (!name.is_empty()).then(|| name.to_string())
    }
}
