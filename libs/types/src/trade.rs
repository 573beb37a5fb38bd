//! Trade print types
//!
//! A trade arrives as a compact market-data update (`Type` 112). The side
//! flag tells whether the print executed against the bid or the ask; `0`
//! means the upstream did not know and is kept as `None`.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which side of the book a trade executed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Side {
    /// Executed at the bid (wire value 1)
    Bid,
    /// Executed at the ask (wire value 2)
    Ask,
}

impl Side {
    pub const BID_CODE: u8 = 1;
    pub const ASK_CODE: u8 = 2;

    /// Wire code for this side.
    pub fn code(&self) -> u8 {
        match self {
            Side::Bid => Self::BID_CODE,
            Side::Ask => Self::ASK_CODE,
        }
    }

    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }
}

impl TryFrom<u8> for Side {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            Self::BID_CODE => Ok(Side::Bid),
            Self::ASK_CODE => Ok(Side::Ask),
            other => Err(format!("AtBidOrAsk must be 1 or 2, got {}", other)),
        }
    }
}

impl From<Side> for u8 {
    fn from(side: Side) -> Self {
        side.code()
    }
}

/// `AtBidOrAsk` on the wire: `0` unset, `1` bid, `2` ask.
mod side_code {
    use super::Side;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const UNSET: u8 = 0;

    pub fn serialize<S: Serializer>(
        side: &Option<Side>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(side.map_or(UNSET, |side| side.code()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Side>, D::Error> {
        match u8::deserialize(deserializer)? {
            UNSET => Ok(None),
            code => Side::try_from(code).map(Some).map_err(serde::de::Error::custom),
        }
    }
}

/// A single trade print.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Trade {
    #[serde(rename = "SymbolID", default, skip_serializing_if = "Option::is_none")]
    pub symbol_id: Option<u32>,
    #[serde(with = "crate::numeric")]
    pub price: Decimal,
    #[serde(with = "crate::numeric")]
    pub volume: Decimal,
    /// Event time in Unix seconds; may carry a fractional millisecond part.
    #[serde(with = "crate::numeric")]
    pub date_time: Decimal,
    /// `None` when the upstream sent `0` (side unknown).
    #[serde(with = "side_code")]
    pub at_bid_or_ask: Option<Side>,
    /// Fields this crate does not interpret, kept for re-encoding.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Trade {
    pub fn new(date_time: Decimal, price: Decimal, volume: Decimal, side: Side) -> Self {
        Self {
            symbol_id: None,
            price,
            volume,
            date_time,
            at_bid_or_ask: Some(side),
            extra: Map::new(),
        }
    }

    /// Wire code of the side flag, `0` when unset.
    pub fn side_code(&self) -> u8 {
        self.at_bid_or_ask.map_or(side_code::UNSET, |side| side.code())
    }

    /// Whole-second event time (floor). `None` if out of `i64` range.
    pub fn epoch_seconds(&self) -> Option<i64> {
        self.date_time.floor().to_i64()
    }
}
