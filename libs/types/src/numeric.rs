//! Decimal prices and volumes as JSON numbers
//!
//! `rust_decimal` serializes to a string by default; the feed carries plain
//! JSON numbers. Integral values are written as integers and the rest as the
//! shortest float that reads back to the same decimal, so a decoded frame
//! re-encodes to the text it arrived as.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
    if value.fract().is_zero() {
        if let Some(int) = value.to_i64() {
            return serializer.serialize_i64(int);
        }
    }
    match value.to_f64() {
        Some(float) => serializer.serialize_f64(float),
        None => Err(serde::ser::Error::custom(format!(
            "{} is not representable as a JSON number",
            value
        ))),
    }
}

/// Accepts JSON integers, floats and numeric strings.
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
    <Decimal as Deserialize>::deserialize(deserializer)
}
