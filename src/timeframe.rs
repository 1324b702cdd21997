//! Candle timeframe handling
//!
//! A timeframe is an amount plus a unit, written the way exchanges write
//! them: "1m", "5m", "1h", "1d", "1w". Candle open times are aligned to
//! timeframe boundaries in UTC.

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeframeUnit {
    Minute,
    Hour,
    Day,
    Week,
}

impl TimeframeUnit {
    fn secs(self) -> u64 {
        match self {
            TimeframeUnit::Minute => 60,
            TimeframeUnit::Hour => 3600,
            TimeframeUnit::Day => 86_400,
            TimeframeUnit::Week => 604_800,
        }
    }

    fn suffix(self) -> char {
        match self {
            TimeframeUnit::Minute => 'm',
            TimeframeUnit::Hour => 'h',
            TimeframeUnit::Day => 'd',
            TimeframeUnit::Week => 'w',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timeframe {
    pub amount: u32,
    pub unit: TimeframeUnit,
}

impl Timeframe {
    pub const MIN_1: Timeframe = Timeframe {
        amount: 1,
        unit: TimeframeUnit::Minute,
    };
    pub const DAY_1: Timeframe = Timeframe {
        amount: 1,
        unit: TimeframeUnit::Day,
    };

    pub fn as_secs(&self) -> u64 {
        u64::from(self.amount) * self.unit.secs()
    }

    pub fn as_minutes(&self) -> u32 {
        (self.as_secs() / 60) as u32
    }

    pub fn as_millis(&self) -> i64 {
        self.as_secs() as i64 * 1000
    }

    /// The open time of the candle containing `date`.
    pub fn prev_date(&self, date: DateTime<Utc>) -> DateTime<Utc> {
        let ms = self.as_millis();
        let ts = date.timestamp_millis();
        timestamp_ms(ts - ts.rem_euclid(ms))
    }

    /// The open time of the candle after the one containing `date`.
    pub fn next_date(&self, date: DateTime<Utc>) -> DateTime<Utc> {
        let ms = self.as_millis();
        let ts = date.timestamp_millis();
        timestamp_ms(ts - ts.rem_euclid(ms) + ms)
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let unit = match value.as_bytes().last() {
            Some(b'm') => TimeframeUnit::Minute,
            Some(b'h') => TimeframeUnit::Hour,
            Some(b'd') => TimeframeUnit::Day,
            Some(b'w') => TimeframeUnit::Week,
            _ => bail!("Invalid timeframe '{value}'"),
        };
        let amount: u32 = match value[..value.len() - 1].parse() {
            Ok(amount) if amount > 0 => amount,
            _ => bail!("Invalid timeframe '{value}'"),
        };
        Ok(Timeframe { amount, unit })
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.suffix())
    }
}

impl Serialize for Timeframe {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(D::Error::custom)
    }
}

/// A UTC datetime from a millisecond timestamp; out-of-range values fall
/// back to the epoch.
pub fn timestamp_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// Human readable form of a millisecond timestamp, for log lines.
pub fn format_ms_time(ms: i64) -> String {
    timestamp_ms(ms).format("%Y-%m-%dT%H:%M:%S").to_string()
}
