//! `tick-export`: trades from a broker log as `DateTime,Price,Volume,AtBidOrAsk`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use feed_tools::common::init_logging;
use feed_tools::csv::{CsvWriter, TICK_HEADER};
use feed_tools::export::TickExporter;
use feed_types::message::Message;
use persistence::journal::{LogError, LogReader};
use persistence::tail::{LiveTail, TailConfig, TailError};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Export trades from a message log to tick CSV")]
struct Args {
    /// Message log to read
    #[arg(short, long)]
    input: PathBuf,

    /// Output CSV (default: <input>.trades)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Keep reading the input as it grows
    #[arg(short, long)]
    follow: bool,

    /// Sleep between reads while following an idle file
    #[arg(long, default_value_t = 100)]
    poll_interval_ms: u64,

    /// Stop following after this long without new data
    #[arg(long, default_value_t = 16 * 60)]
    max_idle_secs: u64,

    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let output = args.output.clone().unwrap_or_else(|| {
        let mut name = args.input.clone().into_os_string();
        name.push(".trades");
        PathBuf::from(name)
    });
    let writer = CsvWriter::create(&output, TICK_HEADER)
        .with_context(|| format!("creating {}", output.display()))?;
    let mut exporter = TickExporter::new(writer);

    info!(input = %args.input.display(), output = %output.display(), follow = args.follow, "Exporting ticks");

    if args.follow {
        let config = TailConfig {
            poll_interval: Duration::from_millis(args.poll_interval_ms),
            max_idle: Duration::from_secs(args.max_idle_secs),
        };
        for line in LiveTail::open(&args.input, config)? {
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
                    exporter.handle(&message)?;
                }
                Err(e) => warn!(error = %e, "Skipping line"),
            }
        }
    } else {
        let reader = LogReader::open(&args.input)
            .with_context(|| format!("opening {}", args.input.display()))?;
        for item in reader {
            match item {
                Ok(message) => {
                    exporter.handle(&message)?;
                }
                Err(e @ LogError::Decode { .. }) => warn!(error = %e, "Skipping line"),
                Err(e) => return Err(e).context("reading input"),
            }
        }
    }

    info!(trades = exporter.trades(), skipped = exporter.skipped(), "Export finished");
    Ok(())
}
