//! Output formatting for command results
//!
//! Text output streams line by line as results arrive; JSON output is a
//! single document printed once the command finishes.

use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use std::io::Write;
use std::time::Duration;

use lanscope_common::{DiscoveredDevice, PingResult, PingStatistics, PortScanResult, PortState, TracerouteHop};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Json,
}

impl Format {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "json" | "j" => Format::Json,
            "text" | "table" | "t" | "" => Format::Text,
            other => {
                eprintln!("Warning: Unknown format '{}', using text", other);
                Format::Text
            }
        }
    }
}

/// Single-line progress indicator on stderr.
pub fn print_progress(fraction: f64, phase: &str) {
    let mut err = std::io::stderr();
    let _ = write!(err, "\r{:>5.1}%  {:<40}", fraction * 100.0, phase);
    let _ = err.flush();
}

pub fn print_devices(devices: &[DiscoveredDevice], format: Format, scan_duration: Duration) -> Result<()> {
    match format {
        Format::Json => print_json(&json!({
            "scan_info": scan_info(scan_duration),
            "devices": devices,
        })),
        Format::Text => {
            eprintln!();
            if devices.is_empty() {
                println!("\nNo devices found.\n");
                return Ok(());
            }

            println!("\n{:-<88}", "");
            println!(
                "{:<16} {:<28} {:<18} {:>10}  {:<10}",
                "IP", "HOSTNAME", "MAC", "LATENCY", "SOURCE"
            );
            println!("{:-<88}", "");
            for device in devices {
                println!(
                    "{:<16} {:<28} {:<18} {:>10}  {:<10}",
                    device.ip,
                    truncate(device.hostname.as_deref().unwrap_or("-"), 28),
                    device.mac.as_deref().unwrap_or("-"),
                    device
                        .latency_ms
                        .map(|ms| format!("{ms:.1}ms"))
                        .unwrap_or_else(|| "-".to_string()),
                    device.source,
                );
            }
            println!("{:-<88}", "");
            println!("\n  Devices: {}", devices.len());
            println!("  Scan duration: {}\n", format_duration(scan_duration));
            Ok(())
        }
    }
}

pub fn print_port(result: &PortScanResult) {
    println!(
        "{:<8} {:<10} {:<12} {}",
        result.port,
        result.state,
        result.service.as_deref().unwrap_or("unknown"),
        result
            .banner
            .as_deref()
            .and_then(|b| b.lines().next())
            .map(|line| truncate(line, 48))
            .unwrap_or_default(),
    );
}

pub fn print_port_summary(host: &str, results: &[PortScanResult], format: Format, scan_duration: Duration) -> Result<()> {
    let count = |state: PortState| results.iter().filter(|r| r.state == state).count();
    let (open, closed, filtered) = (
        count(PortState::Open),
        count(PortState::Closed),
        count(PortState::Filtered),
    );

    match format {
        Format::Json => print_json(&json!({
            "scan_info": scan_info(scan_duration),
            "host": host,
            "summary": { "open": open, "closed": closed, "filtered": filtered },
            "results": results,
        })),
        Format::Text => {
            println!("\nSummary for {host}:");
            println!("  Total scanned: {}", results.len());
            println!("  Open: {open}");
            println!("  Closed: {closed}");
            println!("  Filtered: {filtered}");
            println!("  Scan duration: {}\n", format_duration(scan_duration));
            Ok(())
        }
    }
}

pub fn print_ping(result: &PingResult) {
    if result.is_timeout {
        println!("Request timeout for seq={}", result.sequence);
        return;
    }
    let ttl = result.ttl.map(|t| format!(" ttl={t}")).unwrap_or_default();
    println!(
        "{} bytes from {}: seq={}{} time={:.2} ms",
        result.size,
        result.ip.as_deref().unwrap_or(&result.host),
        result.sequence,
        ttl,
        result.time_ms
    );
}

pub fn print_ping_summary(results: &[PingResult], stats: Option<&PingStatistics>, format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(&json!({
            "results": results,
            "statistics": stats,
        })),
        Format::Text => {
            let Some(stats) = stats else {
                println!("\nNo pings were sent.");
                return Ok(());
            };
            println!("\n--- {} ping statistics ---", stats.host);
            println!(
                "{} transmitted, {} received, {:.1}% packet loss",
                stats.transmitted, stats.received, stats.packet_loss
            );
            if stats.received > 0 {
                let std_dev = stats
                    .std_dev_ms
                    .map(|sd| format!("{sd:.3}"))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "rtt min/avg/max/stddev = {:.3}/{:.3}/{:.3}/{} ms",
                    stats.min_ms, stats.avg_ms, stats.max_ms, std_dev
                );
            }
            Ok(())
        }
    }
}

pub fn print_hop(hop: &TracerouteHop) {
    let times = if hop.times_ms.is_empty() {
        "*".to_string()
    } else {
        hop.times_ms
            .iter()
            .map(|ms| format!("{ms:.2} ms"))
            .collect::<Vec<_>>()
            .join("  ")
    };
    match (&hop.hostname, &hop.ip) {
        (Some(name), Some(ip)) if name != ip => println!("{:>3}  {} ({})  {}", hop.hop, name, ip, times),
        _ => println!("{:>3}  {}  {}", hop.hop, hop.display_address(), times),
    }
}

pub fn print_trace_summary(host: &str, hops: &[TracerouteHop], format: Format) -> Result<()> {
    #[derive(Serialize)]
    struct Trace<'a> {
        host: &'a str,
        hops: &'a [TracerouteHop],
    }

    match format {
        Format::Json => print_json(&Trace { host, hops }),
        Format::Text => Ok(()),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn scan_info(scan_duration: Duration) -> serde_json::Value {
    json!({
        "duration_seconds": scan_duration.as_secs_f64(),
        "duration_formatted": format_duration(scan_duration),
    })
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() > width {
        let kept: String = value.chars().take(width.saturating_sub(3)).collect();
        format!("{kept}...")
    } else {
        value.to_string()
    }
}

/// Format duration in a human-readable way
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs == 0 {
        format!("{}ms", millis)
    } else if total_secs < 60 {
        if millis > 0 {
            format!("{}.{:03}s", total_secs, millis)
        } else {
            format!("{}s", total_secs)
        }
    } else {
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanscope_common::DeviceSource;

    #[test]
    fn test_format_parse() {
        assert_eq!(Format::parse("JSON"), Format::Json);
        assert_eq!(Format::parse("text"), Format::Text);
        assert_eq!(Format::parse("yaml"), Format::Text);
    }

    #[test]
    fn test_print_devices_json() {
        let devices = vec![DiscoveredDevice::new("192.168.1.7", DeviceSource::LocalProbe).with_latency(3.2)];
        assert!(print_devices(&devices, Format::Json, Duration::from_secs(2)).is_ok());
        assert!(print_devices(&devices, Format::Text, Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn test_print_ports() {
        let results = vec![
            PortScanResult::new(22, PortState::Open).with_service("ssh"),
            PortScanResult::new(23, PortState::Closed),
        ];
        assert!(print_port_summary("127.0.0.1", &results, Format::Json, Duration::from_millis(40)).is_ok());
        print_port(&results[0]);
    }

    #[test]
    fn test_print_hop_without_reply() {
        print_hop(&TracerouteHop::timed_out(4));
        let hops = vec![TracerouteHop::reached(1, "10.0.0.1".into(), vec![1.5])];
        assert!(print_trace_summary("10.0.0.1", &hops, Format::Json).is_ok());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration(Duration::from_millis(5500)), "5.500s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
        assert_eq!(format_duration(Duration::from_secs(120)), "2m");
    }
}
