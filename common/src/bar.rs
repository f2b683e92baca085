use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::error::FeedError;

/// Epoch values above this are taken to be milliseconds
const MILLIS_THRESHOLD: u64 = 100_000_000_000;

/// Bar open time as delivered by the feed: epoch seconds, epoch millis or an
/// RFC 3339 string. Compare instants with [`BarTime::epoch_seconds`], not
/// with `==`, which compares representations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BarTime {
    Epoch(i64),
    Fractional(f64),
    Iso(String),
}

impl BarTime {
    pub fn epoch_seconds(&self) -> Result<i64, FeedError> {
        match self {
            BarTime::Epoch(v) => Ok(normalize_epoch(*v)),
            BarTime::Fractional(v) if v.is_finite() => Ok(normalize_epoch(v.floor() as i64)),
            BarTime::Fractional(v) => Err(FeedError::InvalidBarTime(v.to_string())),
            BarTime::Iso(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.timestamp())
                .map_err(|_| FeedError::InvalidBarTime(s.clone())),
        }
    }

    pub fn same_instant(&self, other: &BarTime) -> bool {
        match (self.epoch_seconds(), other.epoch_seconds()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

fn normalize_epoch(value: i64) -> i64 {
    if value.unsigned_abs() >= MILLIS_THRESHOLD {
        value / 1000
    } else {
        value
    }
}

impl From<i64> for BarTime {
    fn from(value: i64) -> Self {
        BarTime::Epoch(value)
    }
}

/// One OHLC(V) candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: BarTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_closed: Option<bool>,
}

impl Bar {
    pub fn new(time: impl Into<BarTime>, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            time: time.into(),
            open,
            high,
            low,
            close,
            volume: None,
            is_closed: None,
        }
    }
}
