// Signal Generation (Layer 2)
// Indicator aggregation, weight tables, market regime helpers and currency strength

pub mod regime;
pub mod scoring;
pub mod signals;
pub mod strength;
pub mod weights;

pub use regime::{is_quiet_market, signal_flipped_within, ATR_HISTORY_LEN, NEW_SIGNAL_LOOKBACK};
pub use scoring::{
    cell_score, zone_threshold, AggregateScore, ScoringEngine, TradingZone, ZoneThresholds,
    MAX_CELL_SCORE,
};
pub use signals::{CellReading, ScoreCell, ScoreMatrix};
pub use strength::{
    parse_pair, CurrencyReading, CurrencyStrength, CurrencyStrengthAggregator, StrengthConfig,
    MAJOR_CURRENCIES,
};
pub use weights::{WeightError, WeightTable};
