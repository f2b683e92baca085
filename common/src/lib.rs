//! Shared domain types for the market analytics feed core:
//! bars, timeframes, indicator signals, dashboard settings and the feed's
//! wire messages.

pub mod bar;
pub mod error;
pub mod message;
pub mod settings;
pub mod signal;
pub mod timeframe;

pub use bar::{Bar, BarTime};
pub use error::FeedError;
pub use message::{
    ConnectedMessage, DataType, ErrorMessage, FeedMessage, IndicatorData, IndicatorSnapshot,
    MessageType, OhlcBarUpdate, OhlcHistory, OutboundMessage, PongMessage, StrengthSnapshot,
    SubscriptionAck, SubscriptionRequest, Tick, TickBatch,
};
pub use settings::{DashboardSettings, TradingStyle, WeightingScheme};
pub use signal::{Indicator, SignalDirection};
pub use timeframe::Timeframe;
