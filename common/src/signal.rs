use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FeedError;

/// Indicators the feed reports a directional signal for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Indicator {
    Ema21,
    Ema50,
    Macd,
    Rsi,
    #[serde(alias = "ut_bot")]
    Utbot,
}

impl Indicator {
    pub const ALL: [Indicator; 5] = [
        Indicator::Ema21,
        Indicator::Ema50,
        Indicator::Macd,
        Indicator::Rsi,
        Indicator::Utbot,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Indicator::Ema21 => "ema21",
            Indicator::Ema50 => "ema50",
            Indicator::Macd => "macd",
            Indicator::Rsi => "rsi",
            Indicator::Utbot => "utbot",
        }
    }

    /// Momentum-style indicators whose signals are halved in a quiet market
    pub fn dampened_when_quiet(&self) -> bool {
        matches!(self, Indicator::Macd | Indicator::Utbot)
    }
}

impl FromStr for Indicator {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        Indicator::ALL
            .into_iter()
            .find(|ind| ind.key() == normalized)
            .ok_or_else(|| FeedError::UnknownIndicator(s.to_string()))
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Directional reading of one indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalDirection {
    #[serde(alias = "bullish", alias = "long")]
    Buy,
    #[serde(alias = "bearish", alias = "short")]
    Sell,
    #[serde(alias = "none", alias = "flat")]
    Neutral,
}

impl SignalDirection {
    pub fn value(&self) -> i8 {
        match self {
            SignalDirection::Buy => 1,
            SignalDirection::Sell => -1,
            SignalDirection::Neutral => 0,
        }
    }
}
