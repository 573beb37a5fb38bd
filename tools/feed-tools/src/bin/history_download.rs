//! `history-download`: tick-by-tick history for one symbol to CSV.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use feed_client::{BlockingClient, ClientOptions, Credentials, FeedClient};
use feed_tools::common::init_logging;
use feed_tools::csv::CsvWriter;
use feed_tools::history::{download, tick_request, Downloader, HistoryFormat};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Download historical ticks to CSV")]
struct Args {
    /// Credentials file: username on line 1, password on line 2
    #[arg(short = 'i', long, default_value = "userpass")]
    userpass: PathBuf,

    #[arg(short, long, default_value = "127.0.0.1")]
    address: String,

    #[arg(short, long, default_value_t = 11198)]
    port: u16,

    #[arg(short, long)]
    symbol: String,

    #[arg(short, long, default_value = "CME")]
    exchange: String,

    /// Start of the range, Unix seconds (0 = earliest available)
    #[arg(long, default_value_t = 0)]
    start: i64,

    /// End of the range, Unix seconds (0 = latest available)
    #[arg(long, default_value_t = 0)]
    end: i64,

    /// Output CSV (default: <symbol>.csv)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write every record field instead of ticks
    #[arg(long)]
    raw: bool,

    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("{}.csv", args.symbol)));
    let format = if args.raw {
        HistoryFormat::Bars
    } else {
        HistoryFormat::Ticks
    };

    let credentials = Credentials::from_file(&args.userpass)?;
    let upstream = format!("{}:{}", args.address, args.port);
    let options = ClientOptions {
        filter_heartbeats: true,
        ..ClientOptions::default()
    };

    let mut client = BlockingClient::connect(&upstream, options)?;
    client.logon(&credentials)?;
    client.send(&tick_request(&args.symbol, &args.exchange, args.start, args.end))?;

    let writer = CsvWriter::create(&output, format.header())
        .with_context(|| format!("creating {}", output.display()))?;
    let mut downloader = Downloader::new(writer, format);

    info!(upstream = %upstream, symbol = %args.symbol, output = %output.display(), "Downloading");
    let records = download(&mut client, &mut downloader)?;
    info!(records, rejected = downloader.rejected(), "Done");
    Ok(())
}
