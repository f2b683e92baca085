// Market regime helpers
// Quiet-market detection from ATR history and recent signal flip detection

use common::SignalDirection;
use statrs::statistics::{Data, OrderStatistics};

/// ATR samples kept per (symbol, timeframe)
pub const ATR_HISTORY_LEN: usize = 200;
/// Fewer samples than this and the regime is unknown
pub const MIN_ATR_SAMPLES: usize = 20;
/// Current ATR at or below this percentile of the trailing window is quiet
pub const QUIET_PERCENTILE: usize = 5;
/// A signal counts as new if its direction flipped within this many bars
pub const NEW_SIGNAL_LOOKBACK: usize = 3;

/// `None` when the trailing window is too short to say
pub fn is_quiet_market(current_atr: f64, trailing: &[f64]) -> Option<bool> {
    let samples: Vec<f64> = trailing.iter().copied().filter(|v| v.is_finite()).collect();
    if samples.len() < MIN_ATR_SAMPLES || !current_atr.is_finite() {
        return None;
    }

    let mut data = Data::new(samples);
    let threshold = data.percentile(QUIET_PERCENTILE);
    Some(current_atr <= threshold)
}

/// True if any of the last `lookback` consecutive pairs changed direction
pub fn signal_flipped_within(history: &[SignalDirection], lookback: usize) -> bool {
    history
        .windows(2)
        .rev()
        .take(lookback)
        .any(|pair| pair[0] != pair[1])
}
