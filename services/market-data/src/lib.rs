//! Market data aggregation
//!
//! Folds the trade feed into fixed-width time buckets and writes two CSV
//! views of them: a historical file of closed buckets and a realtime file
//! holding only the open bucket.
//!
//! # Architecture
//!
//! ```text
//!   Message (feed, log or tailed file)
//!        │
//!   ┌────▼─────┐
//!   │  Engine  │  ← period bucketing, late-trade guard
//!   └────┬─────┘
//!   ┌────┴──────┐
//!   │           │
//! ┌─▼──────┐ ┌──▼─────┐
//! │Candles │ │Ladders │   (one per compute mode)
//! └─┬──────┘ └──┬─────┘
//!   └─────┬─────┘
//!   ┌─────▼─────┐
//!   │  CsvSink  │  historical (append) + realtime (replace)
//!   └───────────┘
//! ```

pub mod candles;
pub mod engine;
pub mod ladder;
pub mod output;
pub mod period;

pub use candles::{Candle, CandleBuilder};
pub use engine::{
    AggregationEngine, BucketSink, BucketSnapshot, ComputeMode, EngineConfig, EngineError,
    Outcome,
};
pub use ladder::{Ladder, LadderBuilder, PriceLevel, TICK};
pub use output::{CsvSink, HistoricalFile, RealtimeFile, IMBALANCE_HEADER, OHLC_HEADER};
pub use period::{Period, PeriodError};

/// Open the historical and realtime files for `mode`.
pub fn csv_sink(
    mode: ComputeMode,
    historical: impl Into<std::path::PathBuf>,
    realtime: impl Into<std::path::PathBuf>,
    append: bool,
) -> Result<CsvSink, EngineError> {
    let header = match mode {
        ComputeMode::Ohlc => OHLC_HEADER,
        ComputeMode::Imbalance => IMBALANCE_HEADER,
    };
    Ok(CsvSink::new(
        HistoricalFile::open(historical, header, append)?,
        RealtimeFile::new(realtime, header)?,
    ))
}
