//! Bucket periods
//!
//! A period string is a positive count followed by a unit: `s`, `min` or
//! `hr` (`10s`, `5min`, `1hr`).

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeriodError {
    #[error("unknown period '{0}' (expected <n>s, <n>min or <n>hr)")]
    Unknown(String),

    #[error("period must be greater than zero: '{0}'")]
    Zero(String),
}

/// Width of a time bucket in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Period {
    seconds: i64,
}

impl Period {
    pub fn from_seconds(seconds: i64) -> Result<Self, PeriodError> {
        if seconds <= 0 {
            return Err(PeriodError::Zero(format!("{}s", seconds)));
        }
        Ok(Self { seconds })
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    /// Start of the bucket holding `time`: `floor(time / period) * period`.
    pub fn bucket(&self, time: i64) -> i64 {
        time.div_euclid(self.seconds) * self.seconds
    }
}

impl FromStr for Period {
    type Err = PeriodError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        let (count, unit) = [("min", 60), ("hr", 3600), ("s", 1)]
            .iter()
            .find_map(|(suffix, unit)| text.strip_suffix(suffix).map(|count| (count, *unit)))
            .ok_or_else(|| PeriodError::Unknown(text.to_string()))?;

        if count.is_empty() || !count.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PeriodError::Unknown(text.to_string()));
        }
        let count: i64 = count
            .parse()
            .map_err(|_| PeriodError::Unknown(text.to_string()))?;
        if count == 0 {
            return Err(PeriodError::Zero(text.to_string()));
        }
        let seconds = count
            .checked_mul(unit)
            .ok_or_else(|| PeriodError::Unknown(text.to_string()))?;
        Ok(Self { seconds })
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.seconds % 3600 == 0 {
            write!(f, "{}hr", self.seconds / 3600)
        } else if self.seconds % 60 == 0 {
            write!(f, "{}min", self.seconds / 60)
        } else {
            write!(f, "{}s", self.seconds)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!("10s".parse::<Period>().unwrap().seconds(), 10);
        assert_eq!("5min".parse::<Period>().unwrap().seconds(), 300);
        assert_eq!("2hr".parse::<Period>().unwrap().seconds(), 7200);
        assert_eq!(" 1min ".parse::<Period>().unwrap().seconds(), 60);
    }

    #[test]
    fn test_rejects_unknown_and_zero() {
        for bad in ["", "min", "10", "10m", "1day", "-5s", "1.5min", "s10"] {
            assert!(
                matches!(bad.parse::<Period>(), Err(PeriodError::Unknown(_))),
                "{:?} should not parse",
                bad
            );
        }
        assert!(matches!("0s".parse::<Period>(), Err(PeriodError::Zero(_))));
        assert!(Period::from_seconds(0).is_err());
    }

    #[test]
    fn test_bucket_floor() {
        let minute = Period::from_seconds(60).unwrap();
        assert_eq!(minute.bucket(125), 120);
        assert_eq!(minute.bucket(120), 120);
        assert_eq!(minute.bucket(59), 0);
        assert_eq!(minute.bucket(-1), -60);
    }

    #[test]
    fn test_display_picks_largest_unit() {
        assert_eq!("120s".parse::<Period>().unwrap().to_string(), "2min");
        assert_eq!("60min".parse::<Period>().unwrap().to_string(), "1hr");
        assert_eq!("45s".parse::<Period>().unwrap().to_string(), "45s");
    }
}
