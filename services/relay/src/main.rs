//! `relay`: forward every downstream connection to one upstream address.

use anyhow::{Context, Result};
use clap::Parser;
use relay::{Relay, RelayConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Relay TCP connections to a fixed upstream")]
struct Args {
    /// Address to accept downstream connections on
    #[arg(long, default_value = "0.0.0.0:11099")]
    listen: String,

    /// Backing server address
    #[arg(long)]
    upstream: String,

    /// Bytes copied per read
    #[arg(long, default_value_t = 2048)]
    buffer_size: usize,

    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let config = RelayConfig {
        buffer_size: args.buffer_size,
        ..RelayConfig::new(args.listen, args.upstream)
    };
    let relay = Relay::bind(config).context("starting relay")?;
    relay.run();
    Ok(())
}
