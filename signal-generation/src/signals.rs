use std::collections::BTreeMap;

use common::{Indicator, SignalDirection, Timeframe};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::scoring::cell_score;

/// What the feed told us about one (timeframe, indicator) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CellReading {
    /// Not enough history upstream to compute the indicator
    NoData,
    Signal {
        direction: SignalDirection,
        is_new: bool,
        quiet_market: bool,
    },
}

impl CellReading {
    pub fn signal(direction: SignalDirection) -> Self {
        CellReading::Signal {
            direction,
            is_new: false,
            quiet_market: false,
        }
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, CellReading::NoData)
    }
}

/// One entry of the scoring matrix with its computed score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreCell {
    pub timeframe: Timeframe,
    pub indicator: Indicator,
    pub reading: CellReading,
    /// `None` for no-data cells
    pub score: Option<Decimal>,
}

/// Timeframe x indicator readings for one symbol
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreMatrix {
    cells: BTreeMap<(Timeframe, Indicator), CellReading>,
}

impl ScoreMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every (timeframe, indicator) pair starts as no data
    pub fn empty_grid(timeframes: &[Timeframe]) -> Self {
        let mut matrix = Self::new();
        for tf in timeframes {
            for ind in Indicator::ALL {
                matrix.insert(*tf, ind, CellReading::NoData);
            }
        }
        matrix
    }

    pub fn insert(&mut self, timeframe: Timeframe, indicator: Indicator, reading: CellReading) {
        self.cells.insert((timeframe, indicator), reading);
    }

    pub fn get(&self, timeframe: Timeframe, indicator: Indicator) -> Option<&CellReading> {
        self.cells.get(&(timeframe, indicator))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Cells in timeframe then indicator order, scored
    pub fn cells(&self) -> impl Iterator<Item = ScoreCell> + '_ {
        self.cells.iter().map(|(&(timeframe, indicator), reading)| {
            let score = match reading {
                CellReading::NoData => None,
                CellReading::Signal {
                    direction,
                    is_new,
                    quiet_market,
                } => Some(cell_score(indicator, *direction, *is_new, *quiet_market)),
            };
            ScoreCell {
                timeframe,
                indicator,
                reading: *reading,
                score,
            }
        })
    }
}
