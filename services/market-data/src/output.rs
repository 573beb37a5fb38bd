//! CSV outputs for closed and open buckets
//!
//! The historical file is append-only: one row per closed candle, or one
//! row per price level of a closed ladder. Its header is written when the
//! file is new or empty. The realtime file holds only the open bucket and
//! is replaced on every update by writing a sibling temp file and renaming
//! it over the old one, so a reader never sees a half-written snapshot.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::candles::Candle;
use crate::engine::{BucketSink, BucketSnapshot, EngineError};
use crate::ladder::Ladder;

pub const OHLC_HEADER: &str = "DateTime,Open,High,Low,Close,Volume";
pub const IMBALANCE_HEADER: &str =
    "DateTime,Price,VolumeAtBid,VolumeAtAsk,TotalVolume,BidImbalance,AskImbalance,VolumeDistribution";

/// Fixed-point text with `dp` decimals, half-to-even.
fn fixed(value: Decimal, dp: u32) -> String {
    format!("{:.*}", dp as usize, value.round_dp(dp))
}

/// `DateTime,Open,High,Low,Close,Volume`
pub fn ohlc_row(candle: &Candle) -> String {
    format!(
        "{},{},{},{},{},{}",
        candle.open_time,
        fixed(candle.open, 2),
        fixed(candle.high, 2),
        fixed(candle.low, 2),
        fixed(candle.close, 2),
        candle.volume.normalize()
    )
}

/// One row per level, ascending price.
pub fn ladder_rows(ladder: &Ladder) -> Vec<String> {
    ladder
        .levels()
        .map(|(price, level)| {
            format!(
                "{},{},{},{},{},{},{},{}",
                ladder.bucket(),
                fixed(*price, 2),
                level.bid_volume.normalize(),
                level.ask_volume.normalize(),
                level.total_volume.normalize(),
                fixed(level.bid_imbalance, 2),
                fixed(level.ask_imbalance, 2),
                fixed(level.volume_distribution, 4)
            )
        })
        .collect()
}

impl BucketSnapshot<'_> {
    pub fn header(&self) -> &'static str {
        match self {
            BucketSnapshot::Candle(_) => OHLC_HEADER,
            BucketSnapshot::Ladder(_) => IMBALANCE_HEADER,
        }
    }

    pub fn rows(&self) -> Vec<String> {
        match self {
            BucketSnapshot::Candle(candle) => vec![ohlc_row(candle)],
            BucketSnapshot::Ladder(ladder) => ladder_rows(ladder),
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> EngineError + '_ {
    move |source| EngineError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn create_parent(path: &Path) -> Result<(), EngineError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(io_error(parent))
        }
        _ => Ok(()),
    }
}

// ── Historical ──────────────────────────────────────────────────────

/// Append-only file of closed buckets.
pub struct HistoricalFile {
    path: PathBuf,
    writer: BufWriter<File>,
    header: &'static str,
    needs_header: bool,
    rows: u64,
}

impl HistoricalFile {
    /// Open for appending (`append`) or start over (truncate).
    pub fn open(
        path: impl Into<PathBuf>,
        header: &'static str,
        append: bool,
    ) -> Result<Self, EngineError> {
        let path = path.into();
        create_parent(&path)?;

        let mut options = OpenOptions::new();
        options.create(true);
        if append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        let file = options.open(&path).map_err(io_error(&path))?;
        let existing = file.metadata().map_err(io_error(&path))?.len();

        info!(path = %path.display(), existing_bytes = existing, "Historical output opened");
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            header,
            needs_header: existing == 0,
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Data rows appended through this handle.
    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    /// Append rows and flush them.
    pub fn append(&mut self, rows: &[String]) -> Result<(), EngineError> {
        let path = self.path.clone();
        if self.needs_header {
            writeln!(self.writer, "{}", self.header).map_err(io_error(&path))?;
            self.needs_header = false;
        }
        for row in rows {
            writeln!(self.writer, "{}", row).map_err(io_error(&path))?;
        }
        self.writer.flush().map_err(io_error(&path))?;
        self.rows += rows.len() as u64;
        Ok(())
    }
}

// ── Realtime ────────────────────────────────────────────────────────

/// Snapshot file of the open bucket, replaced whole on every write.
pub struct RealtimeFile {
    path: PathBuf,
    staging: PathBuf,
    header: &'static str,
}

impl RealtimeFile {
    pub fn new(path: impl Into<PathBuf>, header: &'static str) -> Result<Self, EngineError> {
        let path = path.into();
        create_parent(&path)?;
        let mut name = path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        let staging = path.with_file_name(name);
        Ok(Self {
            path,
            staging,
            header,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file's content with `header` plus `rows`.
    pub fn replace(&self, rows: &[String]) -> Result<(), EngineError> {
        let staging = &self.staging;
        let file = File::create(staging).map_err(io_error(staging))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", self.header).map_err(io_error(staging))?;
        for row in rows {
            writeln!(writer, "{}", row).map_err(io_error(staging))?;
        }
        writer.flush().map_err(io_error(staging))?;
        drop(writer);

        fs::rename(staging, &self.path).map_err(io_error(&self.path))?;
        Ok(())
    }
}

// ── CSV sink ────────────────────────────────────────────────────────

/// Writes closed buckets to the historical file and the open bucket to
/// the realtime file.
pub struct CsvSink {
    historical: HistoricalFile,
    realtime: RealtimeFile,
}

impl CsvSink {
    pub fn new(historical: HistoricalFile, realtime: RealtimeFile) -> Self {
        Self {
            historical,
            realtime,
        }
    }

    pub fn historical(&self) -> &HistoricalFile {
        &self.historical
    }

    pub fn realtime(&self) -> &RealtimeFile {
        &self.realtime
    }
}

impl BucketSink for CsvSink {
    fn bucket_closed(&mut self, snapshot: &BucketSnapshot<'_>) -> Result<(), EngineError> {
        let rows = snapshot.rows();
        self.historical.append(&rows)?;
        debug!(bucket = snapshot.bucket(), rows = rows.len(), "Bucket flushed");
        Ok(())
    }

    fn bucket_updated(&mut self, snapshot: &BucketSnapshot<'_>) -> Result<(), EngineError> {
        self.realtime.replace(&snapshot.rows())
    }
}
