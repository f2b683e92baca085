//! Indicator aggregation engine.
//!
//! Folds a timeframe x indicator matrix of directional signals into one
//! normalized score in `[-100, 100]`, a buy/sell percentage pair and a
//! trading zone. All arithmetic is decimal, so a given matrix and weight
//! table always produce the same result.

use common::{Indicator, SignalDirection, TradingStyle, WeightingScheme};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::signals::{CellReading, ScoreCell, ScoreMatrix};
use crate::weights::WeightTable;

pub const NEW_SIGNAL_BONUS: Decimal = dec!(0.25);
pub const QUIET_MARKET_FACTOR: Decimal = dec!(0.5);
pub const MAX_CELL_SCORE: Decimal = dec!(1.25);
/// Share of positive new signals that raises the boost flag
pub const BOOST_FRACTION: Decimal = dec!(0.25);

const HUNDRED: Decimal = dec!(100);

/// Score a single cell, clamped to `[-1.25, 1.25]`
pub fn cell_score(
    indicator: Indicator,
    direction: SignalDirection,
    is_new: bool,
    quiet_market: bool,
) -> Decimal {
    let base = Decimal::from(direction.value());

    let mut score = base;
    if is_new && !base.is_zero() {
        score += if base.is_sign_positive() {
            NEW_SIGNAL_BONUS
        } else {
            -NEW_SIGNAL_BONUS
        };
    }

    if quiet_market && indicator.dampened_when_quiet() {
        score *= QUIET_MARKET_FACTOR;
    }

    score.clamp(-MAX_CELL_SCORE, MAX_CELL_SCORE)
}

/// Default zone boundary for a trading style
pub fn zone_threshold(style: TradingStyle) -> Decimal {
    match style {
        TradingStyle::Scalper => dec!(25),
        TradingStyle::DayTrader => dec!(20),
        TradingStyle::SwingTrader => dec!(15),
    }
}

/// Per-style zone boundaries on the final score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneThresholds {
    #[serde(default = "default_scalper_threshold")]
    pub scalper: Decimal,
    #[serde(default = "default_day_trader_threshold")]
    pub day_trader: Decimal,
    #[serde(default = "default_swing_trader_threshold")]
    pub swing_trader: Decimal,
}

fn default_scalper_threshold() -> Decimal {
    zone_threshold(TradingStyle::Scalper)
}

fn default_day_trader_threshold() -> Decimal {
    zone_threshold(TradingStyle::DayTrader)
}

fn default_swing_trader_threshold() -> Decimal {
    zone_threshold(TradingStyle::SwingTrader)
}

impl Default for ZoneThresholds {
    fn default() -> Self {
        Self {
            scalper: default_scalper_threshold(),
            day_trader: default_day_trader_threshold(),
            swing_trader: default_swing_trader_threshold(),
        }
    }
}

impl ZoneThresholds {
    pub fn for_style(&self, style: TradingStyle) -> Decimal {
        match style {
            TradingStyle::Scalper => self.scalper,
            TradingStyle::DayTrader => self.day_trader,
            TradingStyle::SwingTrader => self.swing_trader,
        }
    }

    /// Thresholds must lie in `(0, 100]`
    pub fn is_valid(&self) -> bool {
        TradingStyle::ALL.into_iter().all(|style| {
            let t = self.for_style(style);
            t > Decimal::ZERO && t <= HUNDRED
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingZone {
    Buy,
    Sell,
    Wait,
}

impl TradingZone {
    /// Classify against the default threshold of `style`
    pub fn classify(final_score: Decimal, style: TradingStyle) -> Self {
        Self::from_score(final_score, zone_threshold(style))
    }

    /// Boundaries are inclusive: a score equal to the threshold is a trade
    pub fn from_score(final_score: Decimal, threshold: Decimal) -> Self {
        if final_score >= threshold {
            TradingZone::Buy
        } else if final_score <= -threshold {
            TradingZone::Sell
        } else {
            TradingZone::Wait
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateScore {
    pub trading_style: TradingStyle,
    pub weighting_scheme: WeightingScheme,
    /// Weighted sum of cell scores
    pub raw_score: Decimal,
    /// `100 * raw / 1.25`, in `[-100, 100]`
    pub final_score: Decimal,
    pub buy_percent: Decimal,
    pub sell_percent: Decimal,
    pub zone: TradingZone,
    pub new_signal_boost: bool,
    pub scored_cells: usize,
    pub no_data_cells: usize,
    pub positive_new_signals: usize,
    pub cells: Vec<ScoreCell>,
}

impl AggregateScore {
    pub fn has_data(&self) -> bool {
        self.scored_cells > 0
    }
}

/// Stateless apart from its weight tables and zone thresholds
#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    weights: WeightTable,
    thresholds: ZoneThresholds,
}

impl ScoringEngine {
    /// The table is expected to have passed [`WeightTable::validate`]
    pub fn new(weights: WeightTable) -> Self {
        Self {
            weights,
            thresholds: ZoneThresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: ZoneThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn weights(&self) -> &WeightTable {
        &self.weights
    }

    pub fn thresholds(&self) -> &ZoneThresholds {
        &self.thresholds
    }

    pub fn aggregate(
        &self,
        matrix: &ScoreMatrix,
        style: TradingStyle,
        scheme: WeightingScheme,
    ) -> AggregateScore {
        let mut raw = Decimal::ZERO;
        let mut scored_cells = 0usize;
        let mut no_data_cells = 0usize;
        let mut positive_new_signals = 0usize;
        let mut cells = Vec::with_capacity(matrix.len());

        for cell in matrix.cells() {
            match cell.score {
                Some(score) => {
                    scored_cells += 1;
                    let w_tf = self.weights.timeframe_weight(style, cell.timeframe);
                    let w_ind = self.weights.indicator_weight(scheme, cell.indicator);
                    raw += score * w_tf * w_ind;

                    if let CellReading::Signal {
                        direction: SignalDirection::Buy,
                        is_new: true,
                        ..
                    } = cell.reading
                    {
                        positive_new_signals += 1;
                    }
                }
                None => no_data_cells += 1,
            }
            cells.push(cell);
        }

        let final_score = (HUNDRED * raw / MAX_CELL_SCORE).clamp(-HUNDRED, HUNDRED);
        let buy_percent = (final_score + HUNDRED) / dec!(2);
        let sell_percent = HUNDRED - buy_percent;

        let new_signal_boost = scored_cells > 0
            && Decimal::from(positive_new_signals) / Decimal::from(scored_cells) >= BOOST_FRACTION;

        let zone = if scored_cells == 0 {
            TradingZone::Wait
        } else {
            TradingZone::from_score(final_score, self.thresholds.for_style(style))
        };

        debug!(
            "Aggregated {} cells ({} no data): raw={} final={} zone={:?}",
            scored_cells, no_data_cells, raw, final_score, zone
        );

        AggregateScore {
            trading_style: style,
            weighting_scheme: scheme,
            raw_score: raw,
            final_score,
            buy_percent,
            sell_percent,
            zone,
            new_signal_boost,
            scored_cells,
            no_data_cells,
            positive_new_signals,
            cells,
        }
    }
}
