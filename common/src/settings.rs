//! Dashboard settings supplied by the host application

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::timeframe::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TradingStyle {
    Scalper,
    #[serde(alias = "day_trader")]
    DayTrader,
    #[serde(alias = "swing_trader")]
    SwingTrader,
}

impl TradingStyle {
    pub const ALL: [TradingStyle; 3] = [
        TradingStyle::Scalper,
        TradingStyle::DayTrader,
        TradingStyle::SwingTrader,
    ];
}

impl fmt::Display for TradingStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TradingStyle::Scalper => "scalper",
            TradingStyle::DayTrader => "dayTrader",
            TradingStyle::SwingTrader => "swingTrader",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WeightingScheme {
    Equal,
    #[serde(alias = "trend_following")]
    TrendFollowing,
    Momentum,
}

impl WeightingScheme {
    pub const ALL: [WeightingScheme; 3] = [
        WeightingScheme::Equal,
        WeightingScheme::TrendFollowing,
        WeightingScheme::Momentum,
    ];
}

impl fmt::Display for WeightingScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WeightingScheme::Equal => "equal",
            WeightingScheme::TrendFollowing => "trendFollowing",
            WeightingScheme::Momentum => "momentum",
        };
        f.write_str(name)
    }
}

/// Read-only view of the user's dashboard preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardSettings {
    #[serde(default = "default_trading_style")]
    pub trading_style: TradingStyle,

    #[serde(default = "default_weighting_scheme")]
    pub weighting_scheme: WeightingScheme,

    #[serde(default = "default_active_timeframe")]
    pub active_timeframe: Timeframe,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            trading_style: default_trading_style(),
            weighting_scheme: default_weighting_scheme(),
            active_timeframe: default_active_timeframe(),
        }
    }
}

fn default_trading_style() -> TradingStyle {
    TradingStyle::DayTrader
}

fn default_weighting_scheme() -> WeightingScheme {
    WeightingScheme::Equal
}

fn default_active_timeframe() -> Timeframe {
    Timeframe::H1
}
