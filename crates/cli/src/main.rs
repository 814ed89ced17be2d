mod args;
mod output;
mod runner;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use args::{Cli, Commands};
use lanscope_common::EngineConfig;
use runner::Runner;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = EngineConfig::preset(&cli.preset)?;
    config.validate()?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, stopping");
            on_interrupt.cancel();
        }
    });

    let runner = Runner::new(config, output::Format::parse(&cli.output), cancel);
    match cli.command {
        Commands::Discover { targets, prefix } => runner.discover(targets, prefix).await,
        Commands::Ports {
            host,
            ports,
            timeout,
            banner_timeout,
            all,
        } => runner.ports(&host, &ports, timeout, banner_timeout, all).await,
        Commands::Ping {
            host,
            count,
            timeout,
            tcp,
        } => runner.ping(&host, count, timeout, tcp).await,
        Commands::Trace {
            host,
            max_hops,
            timeout,
            tcp,
        } => runner.trace(&host, max_hops, timeout, tcp).await,
    }
}

fn init_logging(verbose: u8) {
    let log_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
