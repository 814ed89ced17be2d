use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "lanscope")]
#[command(version)]
#[command(about = "Local network discovery and diagnostics", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Tuning preset
    #[arg(long, default_value = "balanced", global = true,
          value_parser = ["fast", "balanced", "accurate", "conservative"])]
    pub preset: String,

    /// Output format
    #[arg(short, long, default_value = "text", global = true, value_parser = ["text", "json"])]
    pub output: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Find devices on the local network
    Discover {
        /// Targets instead of the local subnet. Example: 192.168.1.0/24,10.0.0.5
        #[arg(short, long)]
        targets: Option<String>,

        /// Prefix length of the local subnet when no targets are given
        #[arg(long, default_value_t = 24)]
        prefix: u8,
    },

    /// Connect-scan ports on one host
    Ports {
        host: String,

        /// Ports to scan. Examples: 80,443 or 1-1024 or 22,80-90
        #[arg(short, long, default_value = "1-1024")]
        ports: String,

        /// Connect timeout in milliseconds
        #[arg(long, default_value_t = 800)]
        timeout: u64,

        /// Banner grab timeout in milliseconds
        #[arg(long, default_value_t = 300)]
        banner_timeout: u64,

        /// Also list closed and filtered ports
        #[arg(long)]
        all: bool,
    },

    /// Echo a host
    Ping {
        host: String,

        #[arg(short = 'c', long, default_value_t = 4)]
        count: u16,

        /// Per-attempt timeout in milliseconds
        #[arg(long, default_value_t = 2000)]
        timeout: u64,

        /// Time TCP connects instead of sending ICMP
        #[arg(long)]
        tcp: bool,
    },

    /// Trace the route to a host
    Trace {
        host: String,

        #[arg(long)]
        max_hops: Option<u8>,

        /// Per-probe timeout in milliseconds
        #[arg(long, default_value_t = 2000)]
        timeout: u64,

        /// Estimate with TCP connects instead of ICMP
        #[arg(long)]
        tcp: bool,
    },
}
