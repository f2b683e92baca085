//! Per-consumer state and the update logic every consumer shares.
//!
//! A [`ConsumerStore`] is one logical consumer of the feed (a correlation
//! dashboard, a strength meter, a pair tracker). It owns its bar cache and
//! indicator state exclusively, reacts to routed feed messages, and
//! publishes a debounced [`Analysis`] whenever its inputs or the dashboard
//! settings change. Which consumer it is comes entirely from its
//! [`ConsumerProfile`].

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Weak};

use anyhow::Context;
use chrono::{DateTime, Utc};
use common::{
    Bar, DashboardSettings, DataType, FeedMessage, Indicator, IndicatorData, IndicatorSnapshot,
    OutboundMessage, SignalDirection, SubscriptionRequest, Tick, Timeframe,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use signal_generation::{
    is_quiet_market, signal_flipped_within, AggregateScore, CellReading, CurrencyStrength,
    CurrencyStrengthAggregator, ScoreMatrix, ScoringEngine, ATR_HISTORY_LEN, NEW_SIGNAL_LOOKBACK,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DashboardConfig;
use crate::connectors::FeedSender;
use crate::debounce::Debouncer;
use crate::error::{ConfigError, TransportError};
use crate::event_bus::{DisconnectEvent, FeedConsumer, MessageRouter, Topic};
use crate::timeseries::{TimeSeriesCache, UpsertOutcome};

/// Signal directions remembered per indicator for flip detection
const SIGNAL_HISTORY_LEN: usize = NEW_SIGNAL_LOOKBACK + 5;

/// Identity and interests of one consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerProfile {
    pub name: String,

    /// Empty accepts every symbol but subscribes to none
    #[serde(default)]
    pub symbols: Vec<String>,

    /// Empty means the active trading style's timeframes plus the active timeframe
    #[serde(default)]
    pub timeframes: Vec<Timeframe>,

    #[serde(default = "default_data_types")]
    pub data_types: Vec<DataType>,

    /// Message types to route here; `*` for all
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,
}

fn default_data_types() -> Vec<DataType> {
    vec![DataType::Ohlc, DataType::Indicators]
}

fn default_topics() -> Vec<String> {
    vec!["*".to_string()]
}

impl ConsumerProfile {
    pub fn new<I, S>(name: &str, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            symbols: symbols.into_iter().map(Into::into).collect(),
            timeframes: Vec::new(),
            data_types: default_data_types(),
            topics: default_topics(),
        }
    }

    pub fn topics(&self) -> Result<Vec<Topic>, ConfigError> {
        self.topics
            .iter()
            .map(|t| {
                t.parse().map_err(|_| ConfigError::InvalidTopic {
                    consumer: self.name.clone(),
                    topic: t.clone(),
                })
            })
            .collect()
    }

    pub fn wants_symbol(&self, symbol: &str) -> bool {
        self.symbols.is_empty() || self.symbols.iter().any(|s| s.eq_ignore_ascii_case(symbol))
    }

    pub fn wants_timeframe(&self, timeframe: Timeframe) -> bool {
        self.timeframes.is_empty() || self.timeframes.contains(&timeframe)
    }
}

/// Unsubscribes for requests that went away, then subscribes for new ones
pub fn subscription_changes(
    previous: &[SubscriptionRequest],
    next: &[SubscriptionRequest],
) -> Vec<OutboundMessage> {
    let removed = previous
        .iter()
        .filter(|req| !next.contains(req))
        .cloned()
        .map(OutboundMessage::Unsubscribe);
    let added = next
        .iter()
        .filter(|req| !previous.contains(req))
        .cloned()
        .map(OutboundMessage::Subscribe);
    removed.chain(added).collect()
}

/// Debounced output of a consumer
#[derive(Debug, Clone, Default, Serialize)]
pub struct Analysis {
    pub settings: DashboardSettings,
    pub scores: BTreeMap<String, AggregateScore>,
    pub currency_strength: CurrencyStrength,
    pub computed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct IndicatorReading {
    direction: SignalDirection,
    /// Set when the feed says whether the signal is new
    explicit_new: Option<bool>,
    history: VecDeque<SignalDirection>,
}

impl IndicatorReading {
    fn new(direction: SignalDirection) -> Self {
        Self {
            direction,
            explicit_new: None,
            history: VecDeque::new(),
        }
    }

    fn is_new(&self) -> bool {
        self.explicit_new.unwrap_or_else(|| {
            let history: Vec<SignalDirection> = self.history.iter().copied().collect();
            signal_flipped_within(&history, NEW_SIGNAL_LOOKBACK)
        })
    }
}

/// Indicator readings for one (symbol, timeframe)
#[derive(Debug, Clone, Default)]
struct IndicatorState {
    readings: BTreeMap<Indicator, IndicatorReading>,
    quiet_market: Option<bool>,
    atr_history: VecDeque<f64>,
    last_bar_time: Option<i64>,
}

impl IndicatorState {
    fn apply(&mut self, data: &IndicatorData) {
        let bar_time = data.bar_time.as_ref().and_then(|t| t.epoch_seconds().ok());
        let new_bar = bar_time.is_none() || bar_time != self.last_bar_time;
        if bar_time.is_some() {
            self.last_bar_time = bar_time;
        }

        for (key, direction) in &data.signals {
            let indicator = match key.parse::<Indicator>() {
                Ok(indicator) => indicator,
                Err(_) => {
                    debug!("Ignoring unknown indicator {:?}", key);
                    continue;
                }
            };

            let reading = self
                .readings
                .entry(indicator)
                .or_insert_with(|| IndicatorReading::new(*direction));
            match reading.history.back_mut() {
                Some(last) if !new_bar => *last = *direction,
                _ => {
                    reading.history.push_back(*direction);
                    while reading.history.len() > SIGNAL_HISTORY_LEN {
                        reading.history.pop_front();
                    }
                }
            }
            reading.direction = *direction;
            reading.explicit_new = data.new_signals.get(key).copied();
        }

        let derived_quiet = data.atr.filter(|v| v.is_finite()).and_then(|atr| {
            if !new_bar {
                self.atr_history.pop_back();
            }
            let trailing: Vec<f64> = self.atr_history.iter().copied().collect();
            self.atr_history.push_back(atr);
            while self.atr_history.len() > ATR_HISTORY_LEN {
                self.atr_history.pop_front();
            }
            is_quiet_market(atr, &trailing)
        });

        self.quiet_market = data.quiet_market.or(derived_quiet).or(self.quiet_market);
    }

    fn cell(&self, indicator: Indicator) -> CellReading {
        match self.readings.get(&indicator) {
            Some(reading) => CellReading::Signal {
                direction: reading.direction,
                is_new: reading.is_new(),
                quiet_market: self.quiet_market.unwrap_or(false),
            },
            None => CellReading::NoData,
        }
    }
}

#[derive(Debug, Default)]
struct ConsumerState {
    cache: TimeSeriesCache,
    indicators: HashMap<(String, Timeframe), IndicatorState>,
    ticks: HashMap<String, Tick>,
    server_strength: Option<BTreeMap<String, f64>>,
    supported_timeframes: Vec<Timeframe>,
    connected: bool,
    last_error: Option<String>,
}

struct StoreInner {
    profile: ConsumerProfile,
    outbox: FeedSender,
    engine: ScoringEngine,
    strength: CurrencyStrengthAggregator,
    settings: watch::Receiver<DashboardSettings>,
    state: RwLock<ConsumerState>,
    debouncer: Debouncer,
    analysis_tx: watch::Sender<Analysis>,
}

/// One logical consumer with its own cache
#[derive(Clone)]
pub struct ConsumerStore {
    inner: Arc<StoreInner>,
}

impl ConsumerStore {
    pub fn new(
        profile: ConsumerProfile,
        config: &DashboardConfig,
        outbox: FeedSender,
        settings: watch::Receiver<DashboardSettings>,
    ) -> Self {
        let (analysis_tx, _) = watch::channel(Analysis::default());
        let state = ConsumerState {
            cache: TimeSeriesCache::new(config.cache.max_bars),
            ..ConsumerState::default()
        };

        Self {
            inner: Arc::new(StoreInner {
                profile,
                outbox,
                engine: ScoringEngine::new(config.scoring.weights.clone())
                    .with_thresholds(config.scoring.zone_thresholds.clone()),
                strength: CurrencyStrengthAggregator::new(config.strength.clone()),
                settings,
                state: RwLock::new(state),
                debouncer: Debouncer::new(config.scoring.debounce()),
                analysis_tx,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.profile.name
    }

    pub fn profile(&self) -> &ConsumerProfile {
        &self.inner.profile
    }

    /// Register with the router under the profile's name and topics
    pub fn register(&self, router: &MessageRouter) -> Result<(), ConfigError> {
        let topics = self.inner.profile.topics()?;
        router.register_consumer(self.name(), Arc::new(self.clone()), topics);
        Ok(())
    }

    /// Follow dashboard settings: move the feed subscriptions to the new
    /// timeframes and recompute
    pub fn spawn_settings_watcher(&self) -> JoinHandle<()> {
        let mut settings = self.inner.settings.clone();
        let mut subscribed = self.subscriptions();
        let store = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while settings.changed().await.is_ok() {
                match store.upgrade() {
                    Some(inner) => {
                        debug!("Settings changed, rescheduling {}", inner.profile.name);
                        let store = ConsumerStore { inner };
                        subscribed = store.resync_subscriptions(&subscribed);
                        store.schedule_recompute();
                    }
                    None => break,
                }
            }
        })
    }

    /// Send the difference between `previous` and the current subscriptions.
    /// Returns the current set. Nothing is sent while disconnected since
    /// `on_connect` subscribes to the full set.
    fn resync_subscriptions(&self, previous: &[SubscriptionRequest]) -> Vec<SubscriptionRequest> {
        let next = self.subscriptions();
        let changes = subscription_changes(previous, &next);
        if changes.is_empty() || !self.inner.outbox.is_connected() {
            return next;
        }

        let sent = changes
            .iter()
            .filter(|message| self.inner.outbox.send(message))
            .count();
        info!(
            "{}: sent {} of {} subscription changes",
            self.name(),
            sent,
            changes.len()
        );
        next
    }

    fn settings(&self) -> DashboardSettings {
        self.inner.settings.borrow().clone()
    }

    /// Subscription requests for the current settings
    pub fn subscriptions(&self) -> Vec<SubscriptionRequest> {
        let profile = &self.inner.profile;
        let timeframes: BTreeSet<Timeframe> = if profile.timeframes.is_empty() {
            let settings = self.settings();
            let mut tfs: BTreeSet<Timeframe> = self
                .inner
                .engine
                .weights()
                .timeframes_for(settings.trading_style)
                .into_iter()
                .collect();
            tfs.insert(settings.active_timeframe);
            tfs
        } else {
            profile.timeframes.iter().copied().collect()
        };

        profile
            .symbols
            .iter()
            .flat_map(|symbol| {
                timeframes.iter().map(move |tf| SubscriptionRequest {
                    symbol: symbol.clone(),
                    timeframe: *tf,
                    data_types: profile.data_types.clone(),
                })
            })
            .collect()
    }

    /// Bars for the active timeframe
    pub fn get_bars(&self, symbol: &str) -> Vec<Bar> {
        let timeframe = self.settings().active_timeframe;
        self.inner.state.read().cache.bars(symbol, timeframe)
    }

    pub fn get_bars_for(&self, symbol: &str, timeframe_key: &str) -> Vec<Bar> {
        self.inner.state.read().cache.get_bars(symbol, timeframe_key)
    }

    /// Matrix over the active trading style's timeframes
    pub fn get_score_matrix(&self, symbol: &str) -> ScoreMatrix {
        let settings = self.settings();
        let state = self.inner.state.read();
        self.build_matrix(&state, symbol, &settings)
    }

    pub fn get_score(&self, symbol: &str) -> AggregateScore {
        let settings = self.settings();
        let matrix = self.get_score_matrix(symbol);
        self.inner
            .engine
            .aggregate(&matrix, settings.trading_style, settings.weighting_scheme)
    }

    /// Strength from cached closes on the active timeframe
    pub fn get_currency_strength(&self) -> CurrencyStrength {
        let timeframe = self.settings().active_timeframe;
        let state = self.inner.state.read();
        self.compute_strength(&state, timeframe)
    }

    /// Last strength table pushed by the feed, if any
    pub fn server_currency_strength(&self) -> Option<BTreeMap<String, f64>> {
        self.inner.state.read().server_strength.clone()
    }

    pub fn last_tick(&self, symbol: &str) -> Option<Tick> {
        self.inner.state.read().ticks.get(symbol).cloned()
    }

    pub fn supported_timeframes(&self) -> Vec<Timeframe> {
        self.inner.state.read().supported_timeframes.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.read().connected
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.state.read().last_error.clone()
    }

    pub fn subscribe_analysis(&self) -> watch::Receiver<Analysis> {
        self.inner.analysis_tx.subscribe()
    }

    pub fn latest_analysis(&self) -> Analysis {
        self.inner.analysis_tx.borrow().clone()
    }

    pub fn recompute_pending(&self) -> bool {
        self.inner.debouncer.is_pending()
    }

    /// Compute and publish now, cancelling any pending debounced run
    pub fn recompute(&self) -> Analysis {
        self.inner.debouncer.cancel();
        self.publish_analysis()
    }

    fn schedule_recompute(&self) {
        let store: Weak<StoreInner> = Arc::downgrade(&self.inner);
        self.inner.debouncer.schedule(move || {
            if let Some(inner) = store.upgrade() {
                ConsumerStore { inner }.publish_analysis();
            }
        });
    }

    fn publish_analysis(&self) -> Analysis {
        let settings = self.settings();
        let analysis = {
            let state = self.inner.state.read();
            let scores = self
                .analysis_symbols(&state)
                .into_iter()
                .map(|symbol| {
                    let matrix = self.build_matrix(&state, &symbol, &settings);
                    let score = self.inner.engine.aggregate(
                        &matrix,
                        settings.trading_style,
                        settings.weighting_scheme,
                    );
                    (symbol, score)
                })
                .collect();

            Analysis {
                currency_strength: self.compute_strength(&state, settings.active_timeframe),
                scores,
                settings,
                computed_at: Some(Utc::now()),
            }
        };

        debug!(
            "Published analysis for {} ({} symbols)",
            self.name(),
            analysis.scores.len()
        );
        self.inner.analysis_tx.send_replace(analysis.clone());
        analysis
    }

    fn analysis_symbols(&self, state: &ConsumerState) -> Vec<String> {
        if !self.inner.profile.symbols.is_empty() {
            return self.inner.profile.symbols.clone();
        }
        let mut symbols: BTreeSet<String> =
            state.cache.symbols().into_iter().map(str::to_string).collect();
        symbols.extend(state.indicators.keys().map(|(symbol, _)| symbol.clone()));
        symbols.into_iter().collect()
    }

    fn build_matrix(
        &self,
        state: &ConsumerState,
        symbol: &str,
        settings: &DashboardSettings,
    ) -> ScoreMatrix {
        let timeframes = self
            .inner
            .engine
            .weights()
            .timeframes_for(settings.trading_style);
        let mut matrix = ScoreMatrix::empty_grid(&timeframes);

        for timeframe in timeframes {
            if let Some(indicators) = state.indicators.get(&(symbol.to_string(), timeframe)) {
                for indicator in Indicator::ALL {
                    matrix.insert(timeframe, indicator, indicators.cell(indicator));
                }
            }
        }
        matrix
    }

    fn compute_strength(&self, state: &ConsumerState, timeframe: Timeframe) -> CurrencyStrength {
        let series: Vec<(&str, Vec<f64>)> = state
            .cache
            .symbols()
            .into_iter()
            .map(|symbol| (symbol, state.cache.closes(symbol, timeframe)))
            .collect();
        self.inner
            .strength
            .compute(series.iter().map(|(symbol, closes)| (*symbol, closes.as_slice())))
    }

    /// Returns true when aggregation inputs changed
    fn apply(&self, state: &mut ConsumerState, message: &FeedMessage) -> anyhow::Result<bool> {
        let profile = &self.inner.profile;

        match message {
            FeedMessage::Connected(msg) => {
                state.supported_timeframes = msg
                    .supported_timeframes
                    .iter()
                    .filter_map(|tf| Timeframe::resolve(tf))
                    .collect();
                info!(
                    "{}: feed supports {} timeframes",
                    profile.name,
                    state.supported_timeframes.len()
                );
                Ok(false)
            }
            FeedMessage::Subscribed(ack) | FeedMessage::Unsubscribed(ack) => {
                debug!(
                    "{}: {} {:?} {:?}",
                    profile.name,
                    message.message_type(),
                    ack.symbol,
                    ack.timeframe
                );
                Ok(false)
            }
            FeedMessage::InitialOhlc(history) => {
                if !profile.wants_symbol(&history.symbol) {
                    return Ok(false);
                }
                let timeframe: Timeframe = history.timeframe.parse()?;
                if !profile.wants_timeframe(timeframe) {
                    return Ok(false);
                }
                let len = state
                    .cache
                    .seed(&history.symbol, timeframe, history.data.clone());
                debug!(
                    "{}: seeded {} {} with {} bars",
                    profile.name, history.symbol, timeframe, len
                );
                Ok(true)
            }
            FeedMessage::OhlcUpdate(update) => {
                if !profile.wants_symbol(&update.symbol) {
                    return Ok(false);
                }
                let timeframe: Timeframe = update.timeframe.parse()?;
                if !profile.wants_timeframe(timeframe) {
                    return Ok(false);
                }
                let outcome = state
                    .cache
                    .upsert(&update.symbol, timeframe, update.data.clone())
                    .with_context(|| format!("bad bar for {} {}", update.symbol, timeframe))?;
                Ok(outcome != UpsertOutcome::Rejected)
            }
            FeedMessage::Ticks(batch) => {
                for tick in batch.data.iter().filter(|t| profile.wants_symbol(&t.symbol)) {
                    state.ticks.insert(tick.symbol.clone(), tick.clone());
                }
                Ok(false)
            }
            FeedMessage::InitialIndicators(snapshot) => self.apply_indicators(state, snapshot, true),
            FeedMessage::IndicatorUpdate(snapshot) => self.apply_indicators(state, snapshot, false),
            FeedMessage::CurrencyStrengthUpdate(snapshot) => {
                state.server_strength = Some(snapshot.data.clone());
                Ok(false)
            }
            FeedMessage::Pong(_) => {
                debug!("{}: pong", profile.name);
                Ok(false)
            }
            FeedMessage::Error(err) => {
                warn!(
                    "{}: feed error {}: {}",
                    profile.name,
                    err.code.as_deref().unwrap_or("-"),
                    err.message
                );
                state.last_error = Some(err.message.clone());
                Ok(false)
            }
        }
    }

    fn apply_indicators(
        &self,
        state: &mut ConsumerState,
        snapshot: &IndicatorSnapshot,
        reset: bool,
    ) -> anyhow::Result<bool> {
        let profile = &self.inner.profile;
        if !profile.wants_symbol(&snapshot.symbol) {
            return Ok(false);
        }
        let timeframe: Timeframe = snapshot.timeframe.parse()?;
        if !profile.wants_timeframe(timeframe) {
            return Ok(false);
        }

        let entry = state
            .indicators
            .entry((snapshot.symbol.clone(), timeframe))
            .or_default();
        if reset {
            *entry = IndicatorState::default();
        }
        entry.apply(&snapshot.data);
        Ok(true)
    }
}

impl FeedConsumer for ConsumerStore {
    fn on_message(&self, message: &FeedMessage) -> anyhow::Result<()> {
        let changed = {
            let mut state = self.inner.state.write();
            self.apply(&mut state, message)?
        };
        if changed {
            self.schedule_recompute();
        }
        Ok(())
    }

    fn on_connect(&self) -> anyhow::Result<()> {
        {
            let mut state = self.inner.state.write();
            state.connected = true;
            state.last_error = None;
        }

        let requests = self.subscriptions();
        if requests.is_empty() {
            warn!("{}: no symbols configured, nothing to subscribe", self.name());
        }
        let sent = requests
            .into_iter()
            .filter(|req| self.inner.outbox.send(&OutboundMessage::Subscribe(req.clone())))
            .count();
        info!("{}: sent {} subscription requests", self.name(), sent);
        Ok(())
    }

    fn on_disconnect(&self, event: &DisconnectEvent) -> anyhow::Result<()> {
        self.inner.state.write().connected = false;
        if !event.intentional {
            info!(
                "{}: connection {} lost ({}), keeping cached data",
                self.name(),
                event.connection_id,
                event.code
            );
        }
        Ok(())
    }

    fn on_error(&self, error: &TransportError) -> anyhow::Result<()> {
        self.inner.state.write().last_error = Some(error.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{TradingStyle, WeightingScheme};
    use rust_decimal_macros::dec;
    use signal_generation::TradingZone;

    const HOUR: i64 = 3600;
    const T0: i64 = 1_699_999_200;

    fn store_with(
        profile: ConsumerProfile,
        settings: DashboardSettings,
    ) -> (ConsumerStore, watch::Sender<DashboardSettings>) {
        let (tx, rx) = watch::channel(settings);
        let store = ConsumerStore::new(profile, &DashboardConfig::default(), FeedSender::detached(), rx);
        (store, tx)
    }

    fn store() -> ConsumerStore {
        store_with(
            ConsumerProfile::new("pair-tracker", ["EURUSD", "USDJPY"]),
            DashboardSettings::default(),
        )
        .0
    }

    fn feed(store: &ConsumerStore, json: &str) {
        store.on_message(&FeedMessage::decode(json).unwrap()).unwrap();
    }

    fn ohlc_update(symbol: &str, tf: &str, ts: i64, close: f64) -> String {
        format!(
            r#"{{"type":"ohlc_update","symbol":"{symbol}","timeframe":"{tf}",
                "data":{{"time":{ts},"open":{close},"high":{close},"low":{close},"close":{close}}}}}"#
        )
    }

    fn indicator_update(symbol: &str, tf: &str, ts: i64, signal: &str) -> String {
        format!(
            r#"{{"type":"indicator_update","symbol":"{symbol}","timeframe":"{tf}",
                "data":{{"bar_time":{ts},"signals":{{"ema21":"{signal}","ema50":"{signal}",
                "macd":"{signal}","rsi":"{signal}","utbot":"{signal}"}}}}}}"#
        )
    }

    #[test]
    fn test_profile_topics() {
        let mut profile = ConsumerProfile::new("a", ["EURUSD"]);
        assert_eq!(profile.topics().unwrap(), vec![Topic::All]);

        profile.topics = vec!["ticks".to_string(), "nope".to_string()];
        assert!(matches!(
            profile.topics(),
            Err(ConfigError::InvalidTopic { .. })
        ));
        assert!(profile.wants_symbol("eurusd"));
        assert!(!profile.wants_symbol("GBPUSD"));
    }

    #[test]
    fn test_bars_follow_active_timeframe() {
        let store = store();
        feed(&store, &ohlc_update("EURUSD", "H1", T0, 1.10));
        feed(&store, &ohlc_update("EURUSD", "1H", T0 + HOUR, 1.11));
        feed(&store, &ohlc_update("EURUSD", "H4", T0, 1.09));

        assert_eq!(store.get_bars("EURUSD").len(), 2);
        assert_eq!(store.get_bars_for("EURUSD", "4H").len(), 1);
        assert!(store.get_bars("USDJPY").is_empty());
    }

    #[test]
    fn test_ignores_symbols_outside_profile() {
        let store = store();
        feed(&store, &ohlc_update("GBPUSD", "H1", T0, 1.25));
        assert!(store.get_bars_for("GBPUSD", "H1").is_empty());
    }

    #[test]
    fn test_unknown_timeframe_is_a_handler_error() {
        let store = store();
        let msg = FeedMessage::decode(&ohlc_update("EURUSD", "H2", T0, 1.0)).unwrap();
        assert!(store.on_message(&msg).is_err());
    }

    #[test]
    fn test_score_matrix_marks_missing_data() {
        let store = store();
        feed(&store, &indicator_update("EURUSD", "H1", T0, "buy"));

        // dayTrader covers M5, M15, M30, H1, H4
        let matrix = store.get_score_matrix("EURUSD");
        assert_eq!(matrix.len(), 5 * Indicator::ALL.len());
        assert_eq!(
            matrix.get(Timeframe::H1, Indicator::Macd),
            Some(&CellReading::Signal {
                direction: SignalDirection::Buy,
                is_new: false,
                quiet_market: false,
            })
        );
        assert_eq!(matrix.get(Timeframe::H4, Indicator::Macd), Some(&CellReading::NoData));

        let score = store.get_score("EURUSD");
        assert_eq!(score.scored_cells, 5);
        assert_eq!(score.no_data_cells, 20);
        // 1.0 * 0.25 (H1 weight) -> 20 after normalization
        assert_eq!(score.final_score, dec!(20));
        assert_eq!(score.zone, TradingZone::Buy);
    }

    #[test]
    fn test_new_signal_derived_from_flip() {
        let store = store();
        feed(&store, &indicator_update("EURUSD", "H1", T0, "sell"));
        feed(&store, &indicator_update("EURUSD", "H1", T0 + HOUR, "buy"));

        let matrix = store.get_score_matrix("EURUSD");
        assert!(matches!(
            matrix.get(Timeframe::H1, Indicator::Rsi),
            Some(CellReading::Signal { is_new: true, .. })
        ));

        // same bar updated again does not add history
        feed(&store, &indicator_update("EURUSD", "H1", T0 + HOUR, "buy"));
        for i in 2..6 {
            feed(&store, &indicator_update("EURUSD", "H1", T0 + i * HOUR, "buy"));
        }
        let matrix = store.get_score_matrix("EURUSD");
        assert!(matches!(
            matrix.get(Timeframe::H1, Indicator::Rsi),
            Some(CellReading::Signal { is_new: false, .. })
        ));
    }

    #[test]
    fn test_explicit_flags_win() {
        let store = store();
        feed(
            &store,
            r#"{"type":"initial_indicators","symbol":"EURUSD","timeframe":"H1",
                "data":{"signals":{"macd":"sell"},"new_signals":{"macd":true},"quiet_market":true}}"#,
        );

        let matrix = store.get_score_matrix("EURUSD");
        assert_eq!(
            matrix.get(Timeframe::H1, Indicator::Macd),
            Some(&CellReading::Signal {
                direction: SignalDirection::Sell,
                is_new: true,
                quiet_market: true,
            })
        );
        assert_eq!(matrix.get(Timeframe::H1, Indicator::Rsi), Some(&CellReading::NoData));
    }

    #[test]
    fn test_recompute_publishes_and_follows_settings() {
        let (store, settings_tx) = store_with(
            ConsumerProfile::new("dash", ["EURUSD"]),
            DashboardSettings::default(),
        );
        let analysis_rx = store.subscribe_analysis();

        // no runtime: the debounced recompute runs inline
        feed(&store, &indicator_update("EURUSD", "H1", T0, "buy"));
        let analysis = analysis_rx.borrow().clone();
        assert!(analysis.computed_at.is_some());
        assert_eq!(analysis.scores["EURUSD"].trading_style, TradingStyle::DayTrader);

        settings_tx.send_replace(DashboardSettings {
            trading_style: TradingStyle::SwingTrader,
            weighting_scheme: WeightingScheme::Momentum,
            active_timeframe: Timeframe::H4,
        });
        let analysis = store.recompute();
        let score = &analysis.scores["EURUSD"];
        assert_eq!(score.trading_style, TradingStyle::SwingTrader);
        // H1 weighs 0.15 for swing traders
        assert_eq!(score.final_score, dec!(12));
        assert_eq!(score.zone, TradingZone::Wait);
        assert_eq!(store.latest_analysis().settings.active_timeframe, Timeframe::H4);
    }

    #[test]
    fn test_currency_strength_from_cache() {
        let store = store();
        feed(&store, &ohlc_update("EURUSD", "H1", T0, 1.1000));
        feed(&store, &ohlc_update("EURUSD", "H1", T0 + HOUR, 1.1011));

        let strength = store.get_currency_strength();
        assert_eq!(strength.pairs_used, 1);
        assert!(strength.strength("EUR").unwrap() > strength.strength("USD").unwrap());
        assert_eq!(strength.strength("CHF"), Some(50.0));

        feed(
            &store,
            r#"{"type":"currency_strength_update","timeframe":"H1","data":{"USD":61.5}}"#,
        );
        assert_eq!(store.server_currency_strength().unwrap()["USD"], 61.5);
    }

    #[test]
    fn test_lifecycle_and_feed_errors() {
        let store = store();
        store.on_connect().unwrap();
        assert!(store.is_connected());

        feed(&store, r#"{"type":"error","message":"bad symbol","code":"E42"}"#);
        assert_eq!(store.last_error().as_deref(), Some("bad symbol"));

        feed(&store, r#"{"type":"connected","supported_timeframes":["M1","1H","X9"]}"#);
        assert_eq!(store.supported_timeframes(), vec![Timeframe::M1, Timeframe::H1]);

        feed(
            &store,
            r#"{"type":"ticks","data":[{"symbol":"EURUSD","bid":1.1,"ask":1.1002},{"symbol":"GBPUSD","bid":1.3}]}"#,
        );
        assert!(store.last_tick("EURUSD").is_some());
        assert!(store.last_tick("GBPUSD").is_none());

        store
            .on_disconnect(&DisconnectEvent {
                connection_id: uuid::Uuid::new_v4(),
                code: 1006,
                reason: "gone".to_string(),
                intentional: false,
            })
            .unwrap();
        assert!(!store.is_connected());
    }

    #[test]
    fn test_style_change_moves_subscriptions() {
        let (store, settings_tx) = store_with(
            ConsumerProfile::new("pair-tracker", ["EURUSD", "USDJPY"]),
            DashboardSettings::default(),
        );
        let before = store.subscriptions();

        settings_tx.send_replace(DashboardSettings {
            trading_style: TradingStyle::SwingTrader,
            ..DashboardSettings::default()
        });
        let after = store.subscriptions();
        let changes = subscription_changes(&before, &after);

        let timeframes = |action: &str| -> Vec<(String, Timeframe)> {
            changes
                .iter()
                .filter(|m| m.action() == action)
                .map(|m| match m {
                    OutboundMessage::Subscribe(r) | OutboundMessage::Unsubscribe(r) => {
                        (r.symbol.clone(), r.timeframe)
                    }
                    OutboundMessage::Ping => unreachable!(),
                })
                .collect()
        };

        // dayTrader M5..H4 -> swingTrader H1..W1
        let dropped = timeframes("unsubscribe");
        assert_eq!(dropped.len(), 6);
        assert!(dropped.contains(&("EURUSD".to_string(), Timeframe::M5)));
        assert!(dropped.contains(&("USDJPY".to_string(), Timeframe::M30)));

        let added = timeframes("subscribe");
        assert_eq!(added.len(), 4);
        assert!(added.contains(&("EURUSD".to_string(), Timeframe::D1)));
        assert!(added.contains(&("USDJPY".to_string(), Timeframe::W1)));

        // unsubscribes go out first
        assert_eq!(changes[0].action(), "unsubscribe");
        assert!(subscription_changes(&after, &after).is_empty());
    }

    #[test]
    fn test_subscriptions_cover_style_timeframes() {
        let store = store();
        let requests = store.subscriptions();
        // two symbols x (M5, M15, M30, H1, H4)
        assert_eq!(requests.len(), 10);
        assert!(requests
            .iter()
            .all(|r| r.data_types == vec![DataType::Ohlc, DataType::Indicators]));

        let mut profile = ConsumerProfile::new("fixed", ["EURUSD"]);
        profile.timeframes = vec![Timeframe::D1];
        let (fixed, _tx) = store_with(profile, DashboardSettings::default());
        let requests = fixed.subscriptions();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].timeframe, Timeframe::D1);
    }
}
