//! `compute`: OHLC or imbalance buckets from a message log or a live feed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use feed_client::{BlockingClient, ClientOptions, Credentials, FeedClient, FeedFrame};
use feed_types::message::Message;
use market_data::{csv_sink, AggregationEngine, BucketSink, ComputeMode, EngineConfig, Period};
use persistence::journal::{LogError, LogReader};
use persistence::tail::{LiveTail, TailConfig, TailError};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Compute OHLC bars or bid/ask imbalance from trades")]
struct Args {
    /// Message log to read (one JSON message per line)
    #[arg(short, long, conflicts_with = "address")]
    input: Option<PathBuf>,

    /// Keep reading the input as it grows
    #[arg(long, requires = "input")]
    follow: bool,

    /// Live feed address instead of a log file
    #[arg(short, long)]
    address: Option<String>,

    #[arg(short, long, default_value_t = 11199)]
    port: u16,

    /// Credentials file for the live feed
    #[arg(long, default_value = "userpass")]
    userpass: PathBuf,

    /// Symbol to subscribe to on the live feed
    #[arg(short, long, default_value = "ES")]
    symbol: String,

    #[arg(short, long, default_value = "CME")]
    exchange: String,

    /// Closed buckets are appended here
    #[arg(short = 'H', long)]
    historical_file: PathBuf,

    /// The open bucket is rewritten here on every trade
    #[arg(short = 'R', long)]
    realtime_file: PathBuf,

    /// Keep existing historical rows instead of truncating
    #[arg(long)]
    append: bool,

    /// Bucket width: 10s, 5min, 1hr, ...
    #[arg(long, default_value = "1min")]
    period: Period,

    /// ohlc or imbalance
    #[arg(short = 't', long = "type", default_value = "ohlc")]
    mode: ComputeMode,

    /// Sleep between reads while following an idle file
    #[arg(long, default_value_t = 100)]
    poll_interval_ms: u64,

    /// Stop following after this long without new data
    #[arg(long, default_value_t = 16 * 60)]
    max_idle_secs: u64,

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

fn from_log<S: BucketSink>(engine: &mut AggregationEngine<S>, path: &Path) -> Result<()> {
    let reader = LogReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    for item in reader {
        match item {
            Ok(message) => {
                engine.ingest(&message)?;
            }
            Err(e @ LogError::Decode { .. }) => warn!(error = %e, "Skipping line"),
            Err(e) => return Err(e).context("reading input"),
        }
    }
    Ok(())
}

fn from_tail<S: BucketSink>(
    engine: &mut AggregationEngine<S>,
    path: &Path,
    config: TailConfig,
) -> Result<()> {
    let tail = LiveTail::open(path, config)?;
    for line in tail {
        let line = match line {
            Ok(line) => line,
            Err(e @ TailError::InvalidUtf8 { .. }) => {
                warn!(error = %e, "Skipping line");
                continue;
            }
            Err(e) => return Err(e).context("following input"),
        };
        if line.trim().is_empty() {
            continue;
        }
        match Message::from_slice(line.as_bytes()) {
            Ok(message) => {
                engine.ingest(&message)?;
            }
            Err(e) => warn!(error = %e, "Skipping line"),
        }
    }
    Ok(())
}

fn from_feed<S: BucketSink>(engine: &mut AggregationEngine<S>, args: &Args, addr: &str) -> Result<()> {
    let credentials = Credentials::from_file(&args.userpass)?;
    let options = ClientOptions {
        filter_heartbeats: true,
        ..ClientOptions::default()
    };
    let mut client = BlockingClient::connect(addr, options)?;
    client.logon(&credentials)?;
    client.send(&Message::subscribe(1, &args.symbol, &args.exchange))?;

    for item in client.messages() {
        match item {
            Ok(FeedFrame::Message(message)) => {
                engine.ingest(&message)?;
            }
            Ok(FeedFrame::Raw(_)) => {}
            Err(e) if !e.is_fatal() => warn!(error = %e, "Skipping frame"),
            Err(e) => return Err(e).context("live feed"),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let config = EngineConfig {
        period: args.period,
        mode: args.mode,
    };
    let sink = csv_sink(
        config.mode,
        &args.historical_file,
        &args.realtime_file,
        args.append,
    )?;
    let mut engine = AggregationEngine::new(config, sink);

    info!(period = %config.period, mode = ?config.mode, "Starting compute");

    match (&args.input, &args.address) {
        (Some(path), _) if args.follow => {
            let tail = TailConfig {
                poll_interval: Duration::from_millis(args.poll_interval_ms),
                max_idle: Duration::from_secs(args.max_idle_secs),
            };
            from_tail(&mut engine, path, tail)?
        }
        (Some(path), _) => from_log(&mut engine, path)?,
        (None, Some(address)) => {
            let addr = format!("{}:{}", address, args.port);
            from_feed(&mut engine, &args, &addr)?
        }
        (None, None) => bail!("either --input or --address is required"),
    }

    info!(
        trades = engine.trades_applied(),
        late = engine.late_trades(),
        "Input finished"
    );
    Ok(())
}
