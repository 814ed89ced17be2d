//! Subcommand drivers
//!
//! Each command builds the service it needs from the engine config, streams
//! results to the printer and stops the service when Ctrl-C fires.

use anyhow::{anyhow, bail, Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

use lanscope_common::EngineConfig;
use lanscope_orchestrator::{ConnectionBudget, ResultStream, ScanEngine};
use lanscope_phases::standard_pipeline;
use lanscope_probes::{calculate_statistics, PingService, TracerouteService};
use lanscope_scanner_tcp::PortScanner;
use lanscope_target_resolver::{detect_local_ipv4, TargetResolver};

use crate::output::{self, Format};

pub struct Runner {
    config: EngineConfig,
    budget: Arc<ConnectionBudget>,
    format: Format,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(config: EngineConfig, format: Format, cancel: CancellationToken) -> Self {
        let budget = Arc::new(ConnectionBudget::new(config.connection_limit));
        Self {
            config,
            budget,
            format,
            cancel,
        }
    }

    pub async fn discover(&self, targets: Option<String>, prefix: u8) -> Result<()> {
        let local_ip = detect_local_ipv4();
        let context = match targets {
            Some(targets) => TargetResolver::resolve_targets(&targets).await?.into_context(local_ip),
            None => {
                let local_ip = local_ip
                    .context("could not determine the local IPv4 address; pass --targets")?;
                TargetResolver::local_context(local_ip, prefix)?
            }
        };
        info!(hosts = context.hosts.len(), local_ip = ?context.local_ip, "discovering");

        let engine = ScanEngine::from_config(&self.config);
        let pipeline = standard_pipeline(&self.config, Arc::clone(&self.budget), Vec::new());
        let show_progress = self.format == Format::Text;

        let started = Instant::now();
        let devices = engine
            .scan(
                &pipeline,
                &context,
                move |fraction, phase| {
                    if show_progress {
                        output::print_progress(fraction, phase);
                    }
                },
                &self.cancel,
            )
            .await;

        output::print_devices(&devices, self.format, started.elapsed())
    }

    pub async fn ports(&self, host: &str, ports: &str, timeout_ms: u64, banner_timeout_ms: u64, all: bool) -> Result<()> {
        let ports = parse_ports(ports)?;
        let scanner = PortScanner::from_config(&self.config, Arc::clone(&self.budget))
            .with_banner_timeout(Duration::from_millis(banner_timeout_ms));

        let started = Instant::now();
        let stream = scanner.scan(host, ports, Duration::from_millis(timeout_ms));
        let mut results = self.drain(stream, || scanner.stop(), |r| {
            if (all || r.is_open()) && self.format == Format::Text {
                output::print_port(r);
            }
        })
        .await;

        results.sort_by_key(|r| r.port);
        output::print_port_summary(host, &results, self.format, started.elapsed())
    }

    pub async fn ping(&self, host: &str, count: u16, timeout_ms: u64, tcp: bool) -> Result<()> {
        let pinger = PingService::from_config(&self.config, Arc::clone(&self.budget)).with_icmp(!tcp);

        let stream = pinger.ping(host, count, Duration::from_millis(timeout_ms));
        let results = self.drain(stream, || pinger.stop(), |r| {
            if self.format == Format::Text {
                output::print_ping(r);
            }
        })
        .await;

        let stats = calculate_statistics(&results, Some(results.len()));
        output::print_ping_summary(&results, stats.as_ref(), self.format)
    }

    pub async fn trace(&self, host: &str, max_hops: Option<u8>, timeout_ms: u64, tcp: bool) -> Result<()> {
        let tracer = TracerouteService::from_config(&self.config, Arc::clone(&self.budget)).with_icmp(!tcp);
        let max_hops = max_hops.unwrap_or(self.config.traceroute_max_hops);
        if max_hops == 0 {
            bail!("--max-hops must be at least 1");
        }

        let stream = tracer.trace(host, max_hops, Duration::from_millis(timeout_ms));
        let hops = self.drain(stream, || tracer.stop(), |hop| {
            if self.format == Format::Text {
                output::print_hop(hop);
            }
        })
        .await;

        if hops.is_empty() && !self.cancel.is_cancelled() {
            return Err(anyhow!("no route information for {host}"));
        }
        output::print_trace_summary(host, &hops, self.format)
    }

    /// Collect a result stream, echoing each item, and stop the producing
    /// service on Ctrl-C.
    async fn drain<T>(&self, mut stream: ResultStream<T>, stop: impl Fn(), mut each: impl FnMut(&T)) -> Vec<T> {
        let mut items = Vec::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    stop();
                    None
                }
                next = stream.next() => next,
            };
            let Some(item) = next else { break };
            each(&item);
            items.push(item);
        }
        items
    }
}

/// Parses a port string like "80,443,1000-1010" into a list of ports.
fn parse_ports(ports_str: &str) -> Result<Vec<u16>> {
    let mut ports = Vec::new();

    for part in ports_str.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            let start: u16 = start
                .trim()
                .parse()
                .with_context(|| format!("Invalid start port: {start}"))?;
            let end: u16 = end
                .trim()
                .parse()
                .with_context(|| format!("Invalid end port: {end}"))?;
            if start > end {
                bail!("Invalid range: start > end");
            }
            ports.extend(start..=end);
        } else {
            let port: u16 = part.parse().with_context(|| format!("Invalid port: {part}"))?;
            ports.push(port);
        }
    }

    if ports.is_empty() {
        bail!("No ports specified");
    }
    ports.sort_unstable();
    ports.dedup();
    Ok(ports)
}
