//! Feed plumbing for the market analytics dashboard: the websocket transport,
//! the message router, per-consumer bar caches and the shared consumer
//! update logic.

pub mod config;
pub mod connectors;
pub mod consumer;
pub mod debounce;
pub mod error;
pub mod event_bus;
pub mod timeseries;

pub use config::{load_config, DashboardConfig, FeedConfig};
pub use connectors::{ConnectionState, FeedSender, FeedTransport};
pub use consumer::{subscription_changes, Analysis, ConsumerProfile, ConsumerStore};
pub use debounce::Debouncer;
pub use error::{ConfigError, TransportError};
pub use event_bus::{DisconnectEvent, FeedConsumer, MessageRouter, Topic};
pub use timeseries::{TimeSeriesCache, UpsertOutcome};
