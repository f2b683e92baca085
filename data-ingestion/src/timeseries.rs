//! Bounded multi-timeframe bar cache.
//!
//! One [`TimeSeriesCache`] per consumer. Buffers are keyed by symbol and
//! canonical [`Timeframe`], so a buffer written under `H4` is the same buffer
//! read under `4H`. Within a buffer bars are strictly ascending by time with
//! at most one bar per instant.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use common::{Bar, FeedError, Timeframe};
use tracing::{debug, warn};

pub const DEFAULT_MAX_BARS: usize = 100;

/// What an upsert did to the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Newer than every cached bar
    Appended { evicted: bool },
    /// Same instant as a cached bar, which was overwritten
    Replaced,
    /// Older than the newest bar, placed at its sorted position
    Inserted,
    /// Older than everything in a full buffer
    Rejected,
}

#[derive(Debug, Clone)]
struct TimedBar {
    ts: i64,
    bar: Bar,
}

#[derive(Debug, Clone)]
pub struct TimeframeBuffer {
    symbol: String,
    timeframe: Timeframe,
    bars: VecDeque<TimedBar>,
    last_update: Option<DateTime<Utc>>,
}

impl TimeframeBuffer {
    fn new(symbol: &str, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            bars: VecDeque::new(),
            last_update: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    /// Oldest first
    pub fn bars(&self) -> impl Iterator<Item = &Bar> + '_ {
        self.bars.iter().map(|b| &b.bar)
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.back().map(|b| &b.bar)
    }

    pub fn to_vec(&self) -> Vec<Bar> {
        self.bars().cloned().collect()
    }

    fn upsert(&mut self, ts: i64, bar: Bar, cap: usize) -> UpsertOutcome {
        let outcome = match self.bars.back_mut() {
            None => {
                self.bars.push_back(TimedBar { ts, bar });
                UpsertOutcome::Appended { evicted: false }
            }
            Some(last) if last.ts == ts => {
                last.bar = bar;
                UpsertOutcome::Replaced
            }
            Some(last) if ts > last.ts => {
                self.bars.push_back(TimedBar { ts, bar });
                UpsertOutcome::Appended {
                    evicted: self.evict(cap),
                }
            }
            Some(_) => match self.bars.binary_search_by_key(&ts, |b| b.ts) {
                Ok(idx) => {
                    self.bars[idx].bar = bar;
                    UpsertOutcome::Replaced
                }
                Err(0) if self.bars.len() >= cap => {
                    warn!(
                        "Dropping stale {} {} bar at {}: older than all {} cached bars",
                        self.symbol, self.timeframe, ts, cap
                    );
                    return UpsertOutcome::Rejected;
                }
                Err(idx) => {
                    debug!(
                        "Out-of-order {} {} bar at {}, inserting at {}",
                        self.symbol, self.timeframe, ts, idx
                    );
                    self.bars.insert(idx, TimedBar { ts, bar });
                    self.evict(cap);
                    UpsertOutcome::Inserted
                }
            },
        };

        self.last_update = Some(Utc::now());
        outcome
    }

    fn evict(&mut self, cap: usize) -> bool {
        let mut evicted = false;
        while self.bars.len() > cap {
            self.bars.pop_front();
            evicted = true;
        }
        evicted
    }

    fn replace_all(&mut self, bars: Vec<TimedBar>) {
        self.bars = bars.into();
        self.last_update = Some(Utc::now());
    }
}

/// Per-consumer cache of bar buffers
#[derive(Debug, Clone)]
pub struct TimeSeriesCache {
    max_bars: usize,
    buffers: HashMap<String, BTreeMap<Timeframe, TimeframeBuffer>>,
}

impl Default for TimeSeriesCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BARS)
    }
}

impl TimeSeriesCache {
    pub fn new(max_bars: usize) -> Self {
        Self {
            max_bars: max_bars.max(1),
            buffers: HashMap::new(),
        }
    }

    pub fn max_bars(&self) -> usize {
        self.max_bars
    }

    /// Upsert under either timeframe spelling (`H1` or `1H`)
    pub fn upsert_bar(
        &mut self,
        symbol: &str,
        timeframe_key: &str,
        bar: Bar,
    ) -> Result<UpsertOutcome, FeedError> {
        let timeframe = resolve(timeframe_key)?;
        self.upsert(symbol, timeframe, bar)
    }

    pub fn upsert(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        bar: Bar,
    ) -> Result<UpsertOutcome, FeedError> {
        let ts = bar.time.epoch_seconds()?;
        let cap = self.max_bars;
        Ok(self.buffer_mut(symbol, timeframe).upsert(ts, bar, cap))
    }

    /// Replace a buffer with a history snapshot. Bars are sorted, duplicate
    /// instants keep the later entry and only the newest `max_bars` survive.
    /// Returns the resulting length.
    pub fn seed(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        bars: Vec<Bar>,
    ) -> usize {
        let mut timed: Vec<TimedBar> = bars
            .into_iter()
            .filter_map(|bar| match bar.time.epoch_seconds() {
                Ok(ts) => Some(TimedBar { ts, bar }),
                Err(e) => {
                    warn!("Skipping {} {} history bar: {}", symbol, timeframe, e);
                    None
                }
            })
            .collect();

        // stable sort, then keep the last of each run of equal instants
        timed.sort_by_key(|b| b.ts);
        let mut deduped: Vec<TimedBar> = Vec::with_capacity(timed.len());
        for bar in timed {
            match deduped.last_mut() {
                Some(prev) if prev.ts == bar.ts => *prev = bar,
                _ => deduped.push(bar),
            }
        }

        let excess = deduped.len().saturating_sub(self.max_bars);
        deduped.drain(..excess);

        let buffer = self.buffer_mut(symbol, timeframe);
        buffer.replace_all(deduped);
        buffer.len()
    }

    /// Bars for exactly this (symbol, timeframe); empty if unknown
    pub fn get_bars(&self, symbol: &str, timeframe_key: &str) -> Vec<Bar> {
        match Timeframe::resolve(timeframe_key) {
            Some(tf) => self.bars(symbol, tf),
            None => Vec::new(),
        }
    }

    pub fn bars(&self, symbol: &str, timeframe: Timeframe) -> Vec<Bar> {
        self.buffer(symbol, timeframe)
            .map(TimeframeBuffer::to_vec)
            .unwrap_or_default()
    }

    pub fn buffer(&self, symbol: &str, timeframe: Timeframe) -> Option<&TimeframeBuffer> {
        self.buffers.get(symbol)?.get(&timeframe)
    }

    pub fn buffer_by_key(&self, symbol: &str, timeframe_key: &str) -> Option<&TimeframeBuffer> {
        self.buffer(symbol, Timeframe::resolve(timeframe_key)?)
    }

    pub fn closes(&self, symbol: &str, timeframe: Timeframe) -> Vec<f64> {
        self.buffer(symbol, timeframe)
            .map(|b| b.bars().map(|bar| bar.close).collect())
            .unwrap_or_default()
    }

    pub fn last_bar(&self, symbol: &str, timeframe: Timeframe) -> Option<&Bar> {
        self.buffer(symbol, timeframe)?.last()
    }

    /// Sorted
    pub fn symbols(&self) -> Vec<&str> {
        let mut symbols: Vec<&str> = self.buffers.keys().map(String::as_str).collect();
        symbols.sort_unstable();
        symbols
    }

    pub fn timeframes(&self, symbol: &str) -> Vec<Timeframe> {
        self.buffers
            .get(symbol)
            .map(|tfs| tfs.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    fn buffer_mut(&mut self, symbol: &str, timeframe: Timeframe) -> &mut TimeframeBuffer {
        self.buffers
            .entry(symbol.to_string())
            .or_default()
            .entry(timeframe)
            .or_insert_with(|| TimeframeBuffer::new(symbol, timeframe))
    }
}

fn resolve(key: &str) -> Result<Timeframe, FeedError> {
    key.parse()
}
