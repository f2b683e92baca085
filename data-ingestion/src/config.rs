//! Dashboard configuration

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Context;
use common::DashboardSettings;
use serde::{Deserialize, Serialize};
use signal_generation::{StrengthConfig, WeightTable, ZoneThresholds};
use tracing::info;

use crate::consumer::ConsumerProfile;
use crate::error::ConfigError;

/// Environment variable that overrides `feed.url`
pub const FEED_URL_ENV: &str = "FEED_URL";

/// Overall dashboard core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default)]
    pub feed: FeedConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub strength: StrengthConfig,

    /// Initial settings; the UI owns them afterwards
    #[serde(default)]
    pub settings: DashboardSettings,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_consumers")]
    pub consumers: Vec<ConsumerProfile>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            cache: CacheConfig::default(),
            scoring: ScoringConfig::default(),
            strength: StrengthConfig::default(),
            settings: DashboardSettings::default(),
            log_level: default_log_level(),
            consumers: default_consumers(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_consumers() -> Vec<ConsumerProfile> {
    vec![
        ConsumerProfile::new(
            "correlation-dashboard",
            ["EURUSD", "GBPUSD", "USDJPY", "AUDUSD", "USDCAD"],
        ),
        ConsumerProfile::new(
            "strength-meter",
            ["EURUSD", "GBPUSD", "USDJPY", "AUDUSD", "USDCAD", "USDCHF", "NZDUSD"],
        ),
        ConsumerProfile::new("pair-tracker", ["EURUSD"]),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_feed_url")]
    pub url: String,

    /// First reconnect delay; doubles per attempt
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            base_delay_ms: default_base_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

impl FeedConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}

fn default_feed_url() -> String {
    "ws://127.0.0.1:8765/feed".to_string()
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Bars kept per (symbol, timeframe)
    #[serde(default = "default_max_bars")]
    pub max_bars: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bars: default_max_bars(),
        }
    }
}

fn default_max_bars() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Quiet period before an aggregation recompute
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default)]
    pub weights: WeightTable,

    #[serde(default)]
    pub zone_thresholds: ZoneThresholds,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            weights: WeightTable::default(),
            zone_thresholds: ZoneThresholds::default(),
        }
    }
}

impl ScoringConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_debounce_ms() -> u64 {
    500
}

impl DashboardConfig {
    /// Reject configurations that break scoring or routing invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feed.url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl);
        }

        self.scoring.weights.validate()?;

        if !self.scoring.zone_thresholds.is_valid() {
            return Err(ConfigError::InvalidThresholds);
        }

        if !self.strength.is_valid() {
            return Err(ConfigError::InvalidStrengthRange {
                min: self.strength.display_min,
                max: self.strength.display_max,
            });
        }

        let mut names = HashSet::new();
        for profile in &self.consumers {
            if !names.insert(profile.name.as_str()) {
                return Err(ConfigError::DuplicateConsumer(profile.name.clone()));
            }
            profile.topics()?;
        }

        Ok(())
    }

    /// `Some(url)` replaces `feed.url`
    pub fn with_feed_url_override(mut self, url: Option<String>) -> Self {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            info!("Feed URL overridden from environment: {}", url);
            self.feed.url = url;
        }
        self
    }
}

/// Read and validate a TOML file as written, without the environment override
pub fn read_config(path: &str) -> anyhow::Result<DashboardConfig> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_string(),
        source,
    })?;
    let config =
        parse_config(&content).with_context(|| format!("Invalid configuration in {}", path))?;
    Ok(config)
}

/// Load configuration from TOML file, applying `FEED_URL`
pub fn load_config(path: &str) -> anyhow::Result<DashboardConfig> {
    let config = read_config(path)?.with_feed_url_override(std::env::var(FEED_URL_ENV).ok());
    config.validate()?;
    Ok(config)
}

/// Parse and validate configuration text
pub fn parse_config(content: &str) -> Result<DashboardConfig, ConfigError> {
    let config: DashboardConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to TOML file
pub fn save_config(config: &DashboardConfig, path: &str) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(config).map_err(ConfigError::from)?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path))?;
    Ok(())
}

/// Create a default configuration file template
pub fn create_config_template(path: &str) -> anyhow::Result<()> {
    std::fs::write(path, CONFIG_TEMPLATE).with_context(|| format!("Failed to write {}", path))?;
    Ok(())
}

const CONFIG_TEMPLATE: &str = r#"# Market Analytics Dashboard Configuration

# trace | debug | info | warn | error
log_level = "info"

[feed]
# Websocket endpoint of the data feed (FEED_URL overrides this)
url = "ws://127.0.0.1:8765/feed"

# First reconnect delay, doubled on each further attempt (ms)
base_delay_ms = 1000

# Give up after this many consecutive failed reconnects
max_reconnect_attempts = 10

# Application-level ping interval (seconds)
heartbeat_interval_secs = 30

[cache]
# Bars kept per symbol and timeframe
max_bars = 100

[scoring]
# Wait this long after the last update before recomputing scores (ms)
debounce_ms = 500

# Zone thresholds on the final score
[scoring.zone_thresholds]
scalper = 25
dayTrader = 20
swingTrader = 15

# Timeframe weights per trading style; each table must sum to exactly 1.0
[scoring.weights.timeframe_weights.scalper]
"1M" = 0.30
"5M" = 0.30
"15M" = 0.20
"30M" = 0.10
"1H" = 0.10

[scoring.weights.timeframe_weights.dayTrader]
"5M" = 0.10
"15M" = 0.25
"30M" = 0.25
"1H" = 0.25
"4H" = 0.15

[scoring.weights.timeframe_weights.swingTrader]
"1H" = 0.15
"4H" = 0.30
"1D" = 0.35
"1W" = 0.20

# Indicator weights per weighting scheme; each table must sum to exactly 1.0
[scoring.weights.indicator_weights.equal]
ema21 = 0.20
ema50 = 0.20
macd = 0.20
rsi = 0.20
utbot = 0.20

[scoring.weights.indicator_weights.trendFollowing]
ema21 = 0.20
ema50 = 0.30
macd = 0.20
rsi = 0.05
utbot = 0.25

[scoring.weights.indicator_weights.momentum]
ema21 = 0.15
ema50 = 0.10
macd = 0.30
rsi = 0.25
utbot = 0.20

[strength]
# Mean log return is multiplied by this before normalization
multiplier = 1000.0
display_min = 10.0
display_max = 90.0

[settings]
trading_style = "dayTrader"
weighting_scheme = "equal"
active_timeframe = "1H"

[[consumers]]
name = "correlation-dashboard"
symbols = ["EURUSD", "GBPUSD", "USDJPY", "AUDUSD", "USDCAD"]

[[consumers]]
name = "strength-meter"
symbols = ["EURUSD", "GBPUSD", "USDJPY", "AUDUSD", "USDCAD", "USDCHF", "NZDUSD"]
data_types = ["ohlc", "ticks", "currency_strength"]

[[consumers]]
name = "pair-tracker"
symbols = ["EURUSD"]
timeframes = ["1H", "4H"]
topics = ["initial_ohlc", "ohlc_update", "initial_indicators", "indicator_update", "connected", "error"]
"#;
