//! Weight tables for the indicator aggregation engine.
//!
//! Timeframe weights are keyed by trading style, indicator weights by
//! weighting scheme. Every table must sum to exactly 1.0; weights are
//! decimals so the check is exact.

use std::collections::{BTreeMap, HashMap};

use common::{Indicator, Timeframe, TradingStyle, WeightingScheme};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum WeightError {
    #[error("no timeframe weights configured for trading style {0}")]
    MissingStyle(TradingStyle),

    #[error("no indicator weights configured for weighting scheme {0}")]
    MissingScheme(WeightingScheme),

    #[error("{table} weights sum to {sum}, expected exactly 1.0")]
    SumMismatch { table: String, sum: Decimal },

    #[error("{table} weight for {key} is negative ({weight})")]
    Negative {
        table: String,
        key: String,
        weight: Decimal,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightTable {
    /// Trading style -> timeframe -> weight
    #[serde(default = "default_timeframe_weights")]
    pub timeframe_weights: HashMap<TradingStyle, BTreeMap<Timeframe, Decimal>>,

    /// Weighting scheme -> indicator -> weight
    #[serde(default = "default_indicator_weights")]
    pub indicator_weights: HashMap<WeightingScheme, BTreeMap<Indicator, Decimal>>,
}

impl Default for WeightTable {
    fn default() -> Self {
        Self {
            timeframe_weights: default_timeframe_weights(),
            indicator_weights: default_indicator_weights(),
        }
    }
}

impl WeightTable {
    /// Check every style and scheme is present, non-negative and sums to 1.0
    pub fn validate(&self) -> Result<(), WeightError> {
        for style in TradingStyle::ALL {
            let table = self
                .timeframe_weights
                .get(&style)
                .ok_or(WeightError::MissingStyle(style))?;
            check_table(&format!("timeframe[{style}]"), table)?;
        }

        for scheme in WeightingScheme::ALL {
            let table = self
                .indicator_weights
                .get(&scheme)
                .ok_or(WeightError::MissingScheme(scheme))?;
            check_table(&format!("indicator[{scheme}]"), table)?;
        }

        Ok(())
    }

    pub fn timeframe_weight(&self, style: TradingStyle, timeframe: Timeframe) -> Decimal {
        self.timeframe_weights
            .get(&style)
            .and_then(|t| t.get(&timeframe))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn indicator_weight(&self, scheme: WeightingScheme, indicator: Indicator) -> Decimal {
        self.indicator_weights
            .get(&scheme)
            .and_then(|t| t.get(&indicator))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Timeframes that carry weight for a style, shortest first
    pub fn timeframes_for(&self, style: TradingStyle) -> Vec<Timeframe> {
        self.timeframe_weights
            .get(&style)
            .map(|t| {
                t.iter()
                    .filter(|(_, w)| **w > Decimal::ZERO)
                    .map(|(tf, _)| *tf)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn check_table<K: std::fmt::Display>(
    name: &str,
    table: &BTreeMap<K, Decimal>,
) -> Result<(), WeightError> {
    if let Some((key, weight)) = table.iter().find(|(_, w)| **w < Decimal::ZERO) {
        return Err(WeightError::Negative {
            table: name.to_string(),
            key: key.to_string(),
            weight: *weight,
        });
    }

    let sum: Decimal = table.values().copied().sum();
    if sum != Decimal::ONE {
        return Err(WeightError::SumMismatch {
            table: name.to_string(),
            sum,
        });
    }

    Ok(())
}

fn default_timeframe_weights() -> HashMap<TradingStyle, BTreeMap<Timeframe, Decimal>> {
    let mut weights = HashMap::new();
    weights.insert(
        TradingStyle::Scalper,
        BTreeMap::from([
            (Timeframe::M1, dec!(0.30)),
            (Timeframe::M5, dec!(0.30)),
            (Timeframe::M15, dec!(0.20)),
            (Timeframe::M30, dec!(0.10)),
            (Timeframe::H1, dec!(0.10)),
        ]),
    );
    weights.insert(
        TradingStyle::DayTrader,
        BTreeMap::from([
            (Timeframe::M5, dec!(0.10)),
            (Timeframe::M15, dec!(0.25)),
            (Timeframe::M30, dec!(0.25)),
            (Timeframe::H1, dec!(0.25)),
            (Timeframe::H4, dec!(0.15)),
        ]),
    );
    weights.insert(
        TradingStyle::SwingTrader,
        BTreeMap::from([
            (Timeframe::H1, dec!(0.15)),
            (Timeframe::H4, dec!(0.30)),
            (Timeframe::D1, dec!(0.35)),
            (Timeframe::W1, dec!(0.20)),
        ]),
    );
    weights
}

fn default_indicator_weights() -> HashMap<WeightingScheme, BTreeMap<Indicator, Decimal>> {
    let mut weights = HashMap::new();
    weights.insert(
        WeightingScheme::Equal,
        Indicator::ALL.into_iter().map(|ind| (ind, dec!(0.20))).collect(),
    );
    weights.insert(
        WeightingScheme::TrendFollowing,
        BTreeMap::from([
            (Indicator::Ema21, dec!(0.20)),
            (Indicator::Ema50, dec!(0.30)),
            (Indicator::Macd, dec!(0.20)),
            (Indicator::Rsi, dec!(0.05)),
            (Indicator::Utbot, dec!(0.25)),
        ]),
    );
    weights.insert(
        WeightingScheme::Momentum,
        BTreeMap::from([
            (Indicator::Ema21, dec!(0.15)),
            (Indicator::Ema50, dec!(0.10)),
            (Indicator::Macd, dec!(0.30)),
            (Indicator::Rsi, dec!(0.25)),
            (Indicator::Utbot, dec!(0.20)),
        ]),
    );
    weights
}
