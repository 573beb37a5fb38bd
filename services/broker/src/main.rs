//! `broker`: connect upstream, subscribe to one symbol, log and fan out.

use std::path::PathBuf;

use anyhow::{Context, Result};
use broker::{Broker, BrokerConfig, OverflowPolicy};
use clap::{Parser, ValueEnum};
use feed_client::{AsyncFeedClient, BlockingClient, CooperativeClient, Credentials, FeedClient};
use feed_types::message::Message;
use persistence::journal::LogConfig;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ClientKind {
    Blocking,
    Cooperative,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Overflow {
    Disconnect,
    Block,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Log the upstream feed and republish it to subscribers")]
struct Args {
    /// Credentials file: username on line 1, password on line 2
    #[arg(short = 'i', long, default_value = "userpass")]
    userpass: PathBuf,

    /// Upstream feed address
    #[arg(short, long, default_value = "127.0.0.1")]
    address: String,

    /// Upstream feed port
    #[arg(short, long, default_value_t = 11199)]
    port: u16,

    /// Symbol to subscribe to
    #[arg(short, long)]
    symbol: String,

    /// Exchange of the symbol
    #[arg(short, long, default_value = "CME")]
    exchange: String,

    /// Message log path (default: <symbol>.log)
    #[arg(short = 'f', long)]
    log_file: Option<PathBuf>,

    /// Append to an existing log instead of truncating it
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    append: bool,

    /// Address subscribers connect to
    #[arg(long, default_value = "0.0.0.0")]
    server_address: String,

    #[arg(long, default_value_t = 1234)]
    server_port: u16,

    /// Upstream client implementation
    #[arg(long, value_enum, default_value_t = ClientKind::Blocking)]
    client: ClientKind,

    /// Per-subscriber queue capacity
    #[arg(long, default_value_t = 4096)]
    queue_capacity: usize,

    /// What to do with a subscriber whose queue is full
    #[arg(long, value_enum, default_value_t = Overflow::Disconnect)]
    overflow: Overflow,

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

    let credentials = Credentials::from_file(&args.userpass)?;
    let upstream = format!("{}:{}", args.address, args.port);
    let subscribe = Message::subscribe(1, &args.symbol, &args.exchange);

    let log_path = args
        .log_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("{}.log", args.symbol)));
    let config = BrokerConfig {
        queue_capacity: args.queue_capacity,
        overflow: match args.overflow {
            Overflow::Disconnect => OverflowPolicy::Disconnect,
            Overflow::Block => OverflowPolicy::Block,
        },
        ..BrokerConfig::new(
            format!("{}:{}", args.server_address, args.server_port),
            LogConfig {
                append: args.append,
                ..LogConfig::new(log_path)
            },
        )
    };

    info!(upstream = %upstream, symbol = %args.symbol, client = ?args.client, "Starting broker");

    let total = match args.client {
        ClientKind::Blocking => {
            let mut client = BlockingClient::connect(&upstream, Broker::client_options())?;
            client.logon(&credentials)?;
            client.send(&subscribe)?;
            let broker = Broker::bind(config).context("starting broker")?;
            broker.pump(client.messages())?
        }
        ClientKind::Cooperative => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("building runtime")?;
            runtime.block_on(async {
                let mut client =
                    CooperativeClient::connect(&upstream, Broker::client_options()).await?;
                client.logon(&credentials).await?;
                client.send(&subscribe).await?;
                let broker = Broker::bind(config).context("starting broker")?;
                let total = broker.pump_async(&mut client).await?;
                client.close().await;
                anyhow::Ok(total)
            })?
        }
    };

    info!(ingested = total, "Broker exiting");
    Ok(())
}
