//! OHLC candle builder
//!
//! One candle per time bucket. The first trade of a bucket fixes `open`;
//! `high` and `low` are running extremes, `close` is the latest price and
//! `volume` the running sum. Candles are kept for the life of the builder.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single OHLC candle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Bucket start, Unix seconds.
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub trade_count: u64,
}

impl Candle {
    /// Create a new candle from the first trade in its bucket.
    pub fn new(open_time: i64, price: Decimal, volume: Decimal) -> Self {
        Self {
            open_time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
            trade_count: 1,
        }
    }

    /// Update the candle with a new trade.
    pub fn update(&mut self, price: Decimal, volume: Decimal) {
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
        self.close = price;
        self.volume += volume;
        self.trade_count += 1;
    }

    /// Validate candle integrity (OHLC invariants).
    pub fn is_valid(&self) -> bool {
        self.high >= self.open
            && self.high >= self.close
            && self.high >= self.low
            && self.low <= self.open
            && self.low <= self.close
    }
}

/// Candles keyed by bucket start.
#[derive(Debug, Default)]
pub struct CandleBuilder {
    candles: BTreeMap<i64, Candle>,
}

impl CandleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a trade to the candle of `bucket`, creating it if needed.
    pub fn process_trade(&mut self, bucket: i64, price: Decimal, volume: Decimal) -> &Candle {
        self.candles
            .entry(bucket)
            .and_modify(|candle| candle.update(price, volume))
            .or_insert_with(|| Candle::new(bucket, price, volume))
    }

    pub fn get(&self, bucket: i64) -> Option<&Candle> {
        self.candles.get(&bucket)
    }

    /// Candles in chronological order.
    pub fn candles(&self) -> impl Iterator<Item = &Candle> {
        self.candles.values()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn dec(value: i64, scale: u32) -> Decimal {
        Decimal::new(value, scale)
    }

    #[test]
    fn test_candle_creation() {
        let candle = Candle::new(120, dec(400025, 2), Decimal::from(3));
        assert_eq!(candle.open, dec(400025, 2));
        assert_eq!(candle.high, candle.open);
        assert_eq!(candle.low, candle.open);
        assert_eq!(candle.close, candle.open);
        assert_eq!(candle.volume, Decimal::from(3));
        assert_eq!(candle.trade_count, 1);
        assert!(candle.is_valid());
    }

    #[test]
    fn test_candle_update() {
        let mut candle = Candle::new(0, Decimal::from(4000), Decimal::from(1));

        candle.update(dec(400150, 2), Decimal::from(2)); // New high
        candle.update(dec(399875, 2), Decimal::from(3)); // New low
        candle.update(dec(400025, 2), Decimal::from(1)); // Close

        assert_eq!(candle.open, Decimal::from(4000));
        assert_eq!(candle.high, dec(400150, 2));
        assert_eq!(candle.low, dec(399875, 2));
        assert_eq!(candle.close, dec(400025, 2));
        assert_eq!(candle.volume, Decimal::from(7));
        assert_eq!(candle.trade_count, 4);
        assert!(candle.is_valid());
    }

    #[test]
    fn test_builder_keeps_buckets_apart() {
        let mut builder = CandleBuilder::new();
        builder.process_trade(0, Decimal::from(10), Decimal::from(1));
        builder.process_trade(60, Decimal::from(20), Decimal::from(1));
        builder.process_trade(60, Decimal::from(15), Decimal::from(2));

        assert_eq!(builder.len(), 2);
        assert_eq!(builder.get(0).unwrap().close, Decimal::from(10));
        let second = builder.get(60).unwrap();
        assert_eq!(second.open, Decimal::from(20));
        assert_eq!(second.low, Decimal::from(15));
        assert_eq!(second.volume, Decimal::from(3));
        let order: Vec<i64> = builder.candles().map(|c| c.open_time).collect();
        assert_eq!(order, vec![0, 60]);
    }

    #[test]
    fn test_integrity_validation() {
        let invalid = Candle {
            open_time: 0,
            open: Decimal::from(50),
            high: Decimal::from(49), // High < Open → invalid
            low: Decimal::from(48),
            close: Decimal::from(49),
            volume: Decimal::from(1),
            trade_count: 1,
        };
        assert!(!invalid.is_valid());
    }

    proptest! {
        #[test]
        fn prop_candle_tracks_running_extremes(
            ticks in prop::collection::vec((1i64..40_000, 1i64..100), 1..50)
        ) {
            let mut builder = CandleBuilder::new();
            for (price, volume) in &ticks {
                builder.process_trade(0, dec(*price * 25, 2), Decimal::from(*volume));
            }
            let candle = builder.get(0).unwrap();
            let prices: Vec<Decimal> = ticks.iter().map(|(p, _)| dec(*p * 25, 2)).collect();

            prop_assert_eq!(candle.open, prices[0]);
            prop_assert_eq!(candle.close, *prices.last().unwrap());
            prop_assert_eq!(candle.high, *prices.iter().max().unwrap());
            prop_assert_eq!(candle.low, *prices.iter().min().unwrap());
            prop_assert_eq!(candle.volume, Decimal::from(ticks.iter().map(|(_, v)| v).sum::<i64>()));
            prop_assert!(candle.is_valid());
        }
    }
}
