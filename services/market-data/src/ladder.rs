//! Per-bucket price ladder with bid/ask imbalance
//!
//! A ladder maps price to [`PriceLevel`] for one time bucket. Adding volume
//! at a price:
//! - updates that level's bid or ask total;
//! - recomputes imbalance for that level and the levels one tick above and
//!   below, and only those;
//! - recomputes volume distribution for every level in the bucket.
//!
//! A level's imbalance reads only its own volumes and those one tick away,
//! so any change that could move it also touches it or a neighbour. The
//! local refresh therefore always agrees with a full-ladder recompute.
//!
//! `BTreeMap` keeps levels in ascending price order for output.

use std::collections::BTreeMap;

use feed_types::trade::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Minimum price increment between adjacent levels (0.25).
pub const TICK: Decimal = Decimal::from_parts(25, 0, 0, false, 2);

/// Volume and imbalance at one price within one bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub bid_volume: Decimal,
    pub ask_volume: Decimal,
    pub total_volume: Decimal,
    /// `bid(p) / max(1, ask(p + tick))`
    pub bid_imbalance: Decimal,
    /// `ask(p) / max(1, bid(p - tick))`
    pub ask_imbalance: Decimal,
    /// Share of the bucket's total volume traded at this price.
    pub volume_distribution: Decimal,
}

impl PriceLevel {
    fn add(&mut self, side: Side, volume: Decimal) {
        match side {
            Side::Bid => self.bid_volume += volume,
            Side::Ask => self.ask_volume += volume,
        }
        self.total_volume = self.bid_volume + self.ask_volume;
    }
}

/// All price levels of one bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ladder {
    bucket: i64,
    levels: BTreeMap<Decimal, PriceLevel>,
    total_volume: Decimal,
}

impl Ladder {
    pub fn new(bucket: i64) -> Self {
        Self {
            bucket,
            ..Self::default()
        }
    }

    pub fn bucket(&self) -> i64 {
        self.bucket
    }

    pub fn total_volume(&self) -> Decimal {
        self.total_volume
    }

    pub fn level(&self, price: Decimal) -> Option<&PriceLevel> {
        self.levels.get(&price)
    }

    /// Levels in ascending price order.
    pub fn levels(&self) -> impl Iterator<Item = (&Decimal, &PriceLevel)> {
        self.levels.iter()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Add traded volume at `price` on `side`.
    pub fn add(&mut self, price: Decimal, side: Side, volume: Decimal) {
        self.levels.entry(price).or_default().add(side, volume);
        self.total_volume += volume;

        for p in [price, price + TICK, price - TICK] {
            self.refresh_imbalance(p);
        }
        self.refresh_distribution();
    }

    /// Recompute the imbalance of the level at `price`, if there is one.
    /// A missing neighbour counts as zero volume.
    fn refresh_imbalance(&mut self, price: Decimal) {
        let ask_above = self
            .levels
            .get(&(price + TICK))
            .map_or(Decimal::ZERO, |level| level.ask_volume);
        let bid_below = self
            .levels
            .get(&(price - TICK))
            .map_or(Decimal::ZERO, |level| level.bid_volume);

        if let Some(level) = self.levels.get_mut(&price) {
            level.bid_imbalance = ratio(level.bid_volume, ask_above.max(Decimal::ONE));
            level.ask_imbalance = ratio(level.ask_volume, bid_below.max(Decimal::ONE));
        }
    }

    fn refresh_distribution(&mut self) {
        let total = self.total_volume;
        for level in self.levels.values_mut() {
            level.volume_distribution = if total.is_zero() {
                Decimal::ZERO
            } else {
                ratio(level.total_volume, total)
            };
        }
    }
}

fn ratio(numerator: Decimal, denominator: Decimal) -> Decimal {
    numerator.checked_div(denominator).unwrap_or(Decimal::ZERO)
}

/// Ladders keyed by bucket start.
#[derive(Debug, Default)]
pub struct LadderBuilder {
    ladders: BTreeMap<i64, Ladder>,
}

impl LadderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a trade to the ladder of `bucket`, creating it if needed.
    pub fn process_trade(
        &mut self,
        bucket: i64,
        price: Decimal,
        side: Side,
        volume: Decimal,
    ) -> &Ladder {
        let ladder = self
            .ladders
            .entry(bucket)
            .or_insert_with(|| Ladder::new(bucket));
        ladder.add(price, side, volume);
        ladder
    }

    pub fn get(&self, bucket: i64) -> Option<&Ladder> {
        self.ladders.get(&bucket)
    }

    pub fn len(&self) -> usize {
        self.ladders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ladders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn price(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    #[test]
    fn test_tick_value() {
        assert_eq!(TICK, Decimal::new(25, 2));
    }

    #[test]
    fn test_bid_imbalance_against_ask_above() {
        let mut ladder = Ladder::new(0);
        ladder.add(price(10000), Side::Bid, Decimal::from(10));
        ladder.add(price(10025), Side::Ask, Decimal::from(5));

        let level = ladder.level(price(10000)).unwrap();
        assert_eq!(level.bid_imbalance, Decimal::from(2));
        // Nothing bid at 99.75.
        assert_eq!(level.ask_imbalance, Decimal::ZERO);

        let above = ladder.level(price(10025)).unwrap();
        assert_eq!(above.ask_imbalance, Decimal::new(5, 1));
    }

    #[test]
    fn test_missing_neighbour_divides_by_one() {
        let mut ladder = Ladder::new(0);
        ladder.add(price(10000), Side::Bid, Decimal::from(7));
        let level = ladder.level(price(10000)).unwrap();
        assert_eq!(level.bid_imbalance, Decimal::from(7));
        assert_eq!(level.total_volume, Decimal::from(7));
        assert_eq!(level.volume_distribution, Decimal::ONE);
    }

    #[test]
    fn test_trade_refreshes_level_below() {
        let mut ladder = Ladder::new(0);
        ladder.add(price(10000), Side::Bid, Decimal::from(8));
        ladder.add(price(10025), Side::Ask, Decimal::from(2));
        assert_eq!(ladder.level(price(10000)).unwrap().bid_imbalance, Decimal::from(4));

        ladder.add(price(10025), Side::Ask, Decimal::from(6));
        assert_eq!(ladder.level(price(10000)).unwrap().bid_imbalance, Decimal::ONE);

        // Two ticks away: 100.00 is not a neighbour of 100.50.
        ladder.add(price(10050), Side::Ask, Decimal::from(50));
        assert_eq!(ladder.level(price(10000)).unwrap().bid_imbalance, Decimal::ONE);
    }

    #[test]
    fn test_distribution_rescans_every_level() {
        let mut ladder = Ladder::new(0);
        ladder.add(price(10000), Side::Bid, Decimal::from(1));
        ladder.add(price(20000), Side::Ask, Decimal::from(3));

        // 200.00 is far from 100.00, but 100.00's share still drops.
        assert_eq!(
            ladder.level(price(10000)).unwrap().volume_distribution,
            Decimal::new(25, 2)
        );
        assert_eq!(
            ladder.level(price(20000)).unwrap().volume_distribution,
            Decimal::new(75, 2)
        );
    }

    #[test]
    fn test_builder_creates_one_ladder_per_bucket() {
        let mut builder = LadderBuilder::new();
        builder.process_trade(0, price(10000), Side::Bid, Decimal::ONE);
        builder.process_trade(60, price(10000), Side::Ask, Decimal::ONE);
        builder.process_trade(60, price(10025), Side::Ask, Decimal::ONE);

        assert_eq!(builder.len(), 2);
        assert_eq!(builder.get(0).unwrap().len(), 1);
        assert_eq!(builder.get(60).unwrap().len(), 2);
        assert_eq!(builder.get(60).unwrap().bucket(), 60);
    }

    proptest! {
        #[test]
        fn prop_distribution_sums_to_one(
            trades in prop::collection::vec((0i64..40, any::<bool>(), 1i64..500), 1..80)
        ) {
            let mut ladder = Ladder::new(0);
            for (tick, at_bid, volume) in &trades {
                let side = if *at_bid { Side::Bid } else { Side::Ask };
                ladder.add(Decimal::from(4000) + TICK * Decimal::from(*tick), side, Decimal::from(*volume));

                let sum: Decimal = ladder.levels().map(|(_, l)| l.volume_distribution).sum();
                prop_assert!((sum - Decimal::ONE).abs() < Decimal::new(1, 20), "sum = {}", sum);
            }

            let total: Decimal = ladder.levels().map(|(_, l)| l.total_volume).sum();
            prop_assert_eq!(total, ladder.total_volume());
        }

        #[test]
        fn prop_local_refresh_matches_full_recompute(
            trades in prop::collection::vec((0i64..12, any::<bool>(), 1i64..50), 1..60)
        ) {
            let mut ladder = Ladder::new(0);
            for (tick, at_bid, volume) in &trades {
                let side = if *at_bid { Side::Bid } else { Side::Ask };
                ladder.add(TICK * Decimal::from(*tick), side, Decimal::from(*volume));
            }

            let mut full = ladder.clone();
            let prices: Vec<Decimal> = full.levels.keys().copied().collect();
            for p in prices {
                full.refresh_imbalance(p);
            }
            prop_assert_eq!(full, ladder);
        }
    }
}
