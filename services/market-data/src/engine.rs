//! Aggregation engine
//!
//! `ingest` takes one decoded message at a time, in feed order. Trades are
//! bucketed by `floor(time / period) * period` and folded into the bucket's
//! candle (OHLC mode) or price ladder (imbalance mode). When a trade lands
//! in a later bucket than the current one, the current bucket is handed to
//! the sink as closed, exactly once. Every applied trade then hands the
//! open bucket to the sink as updated.
//!
//! Ingestion is single-threaded; the engine holds no locks.

use std::path::PathBuf;
use std::str::FromStr;

use feed_types::message::Message;
use feed_types::trade::Trade;
use thiserror::Error;
use tracing::{debug, warn};

use crate::candles::{Candle, CandleBuilder};
use crate::ladder::{Ladder, LadderBuilder};
use crate::period::Period;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("output {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What the engine computes per bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComputeMode {
    #[default]
    Ohlc,
    Imbalance,
}

impl FromStr for ComputeMode {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "ohlc" => Ok(ComputeMode::Ohlc),
            "imbalance" => Ok(ComputeMode::Imbalance),
            other => Err(format!("unknown compute type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub period: Period,
    pub mode: ComputeMode,
}

/// Borrowed view of one bucket's state.
#[derive(Debug, Clone, Copy)]
pub enum BucketSnapshot<'a> {
    Candle(&'a Candle),
    Ladder(&'a Ladder),
}

impl BucketSnapshot<'_> {
    pub fn bucket(&self) -> i64 {
        match self {
            BucketSnapshot::Candle(candle) => candle.open_time,
            BucketSnapshot::Ladder(ladder) => ladder.bucket(),
        }
    }
}

/// Receives closed and in-progress buckets.
pub trait BucketSink {
    /// A bucket is final. Called once per bucket, in bucket order.
    fn bucket_closed(&mut self, snapshot: &BucketSnapshot<'_>) -> Result<(), EngineError>;

    /// The open bucket changed.
    fn bucket_updated(&mut self, snapshot: &BucketSnapshot<'_>) -> Result<(), EngineError>;
}

/// Result of ingesting one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied { bucket: i64 },
    /// Not a trade.
    Ignored,
    /// Trade time outside the representable range, or no side in
    /// imbalance mode.
    Invalid,
    /// Trade belongs to a bucket that has already been closed.
    Late { bucket: i64 },
}

enum Tables {
    Ohlc(CandleBuilder),
    Imbalance(LadderBuilder),
}

impl Tables {
    fn snapshot(&self, bucket: i64) -> Option<BucketSnapshot<'_>> {
        match self {
            Tables::Ohlc(builder) => builder.get(bucket).map(BucketSnapshot::Candle),
            Tables::Imbalance(builder) => builder.get(bucket).map(BucketSnapshot::Ladder),
        }
    }
}

pub struct AggregationEngine<S> {
    config: EngineConfig,
    sink: S,
    tables: Tables,
    current: Option<i64>,
    applied: u64,
    late: u64,
}

impl<S: BucketSink> AggregationEngine<S> {
    pub fn new(config: EngineConfig, sink: S) -> Self {
        let tables = match config.mode {
            ComputeMode::Ohlc => Tables::Ohlc(CandleBuilder::new()),
            ComputeMode::Imbalance => Tables::Imbalance(LadderBuilder::new()),
        };
        Self {
            config,
            sink,
            tables,
            current: None,
            applied: 0,
            late: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start of the open bucket, if any trade has been applied.
    pub fn current_bucket(&self) -> Option<i64> {
        self.current
    }

    pub fn trades_applied(&self) -> u64 {
        self.applied
    }

    pub fn late_trades(&self) -> u64 {
        self.late
    }

    pub fn snapshot(&self, bucket: i64) -> Option<BucketSnapshot<'_>> {
        self.tables.snapshot(bucket)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Feed one message. Anything but a trade is ignored.
    pub fn ingest(&mut self, message: &Message) -> Result<Outcome, EngineError> {
        match message.as_trade() {
            Some(trade) => self.ingest_trade(trade),
            None => {
                debug!(kind = message.message_type().label(), "Ignoring non-trade message");
                Ok(Outcome::Ignored)
            }
        }
    }

    pub fn ingest_trade(&mut self, trade: &Trade) -> Result<Outcome, EngineError> {
        let Some(time) = trade.epoch_seconds() else {
            warn!(date_time = %trade.date_time, "Trade time out of range, skipping");
            return Ok(Outcome::Invalid);
        };
        let bucket = self.config.period.bucket(time);

        let previous = self.current;
        if let Some(current) = previous {
            if bucket < current {
                self.late += 1;
                warn!(bucket, current, price = %trade.price, "Trade for a closed bucket, dropping");
                return Ok(Outcome::Late { bucket });
            }
        }

        match (&mut self.tables, trade.at_bid_or_ask) {
            (Tables::Ohlc(builder), _) => {
                builder.process_trade(bucket, trade.price, trade.volume);
            }
            (Tables::Imbalance(builder), Some(side)) => {
                builder.process_trade(bucket, trade.price, side, trade.volume);
            }
            (Tables::Imbalance(_), None) => {
                warn!(price = %trade.price, volume = %trade.volume, "Trade without a side, skipping");
                return Ok(Outcome::Invalid);
            }
        }
        self.applied += 1;
        self.current = Some(bucket);

        if let Some(closed) = previous.filter(|&p| p != bucket) {
            if let Some(snapshot) = self.tables.snapshot(closed) {
                self.sink.bucket_closed(&snapshot)?;
            }
        }
        if let Some(snapshot) = self.tables.snapshot(bucket) {
            self.sink.bucket_updated(&snapshot)?;
        }
        Ok(Outcome::Applied { bucket })
    }
}
