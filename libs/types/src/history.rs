//! Historical price data request and record types
//!
//! A historical transfer is one request answered by a stream of records;
//! the last record of the transfer carries `IsFinalRecord = 1`.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Record interval code for tick-by-tick history.
pub const INTERVAL_TICK: i32 = 0;

/// Request for historical price data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HistoricalPriceDataRequest {
    #[serde(rename = "RequestID")]
    pub request_id: i32,
    pub symbol: String,
    pub exchange: String,
    pub record_interval: i32,
    pub start_date_time: i64,
    pub end_date_time: i64,
    pub max_days_to_return: u32,
    #[serde(rename = "UseZLibCompression")]
    pub use_zlib_compression: u8,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HistoricalPriceDataRequest {
    /// Uncompressed tick-by-tick request for `[start, end]` (0 means open-ended).
    pub fn ticks(request_id: i32, symbol: &str, exchange: &str, start: i64, end: i64) -> Self {
        Self {
            request_id,
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            record_interval: INTERVAL_TICK,
            start_date_time: start,
            end_date_time: end,
            max_days_to_return: 0,
            use_zlib_compression: 0,
            extra: Map::new(),
        }
    }
}

/// One bar (or tick, for tick-interval requests) of historical data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HistoricalPriceRecord {
    #[serde(rename = "RequestID", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<i32>,
    #[serde(default)]
    pub start_date_time: i64,
    #[serde(default, with = "crate::numeric")]
    pub open_price: Decimal,
    #[serde(default, with = "crate::numeric")]
    pub high_price: Decimal,
    #[serde(default, with = "crate::numeric")]
    pub low_price: Decimal,
    #[serde(default, with = "crate::numeric")]
    pub last_price: Decimal,
    #[serde(default, with = "crate::numeric")]
    pub volume: Decimal,
    #[serde(default)]
    pub num_trades: u64,
    #[serde(default, with = "crate::numeric")]
    pub bid_volume: Decimal,
    #[serde(default, with = "crate::numeric")]
    pub ask_volume: Decimal,
    #[serde(
        default,
        serialize_with = "bool_as_int",
        deserialize_with = "bool_from_int"
    )]
    pub is_final_record: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn bool_as_int<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*value))
}

fn bool_from_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Bool(flag) => Ok(flag),
        Value::Number(n) => Ok(n.as_f64().map(|v| v != 0.0).unwrap_or(false)),
        Value::Null => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "IsFinalRecord must be numeric, got {}",
            other
        ))),
    }
}
