use signal_generation::WeightError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("socket error: {0}")]
    Socket(#[from] tungstenite::Error),

    #[error("failed to encode outbound message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("connect cancelled by disconnect")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid weights: {0}")]
    Weights(#[from] WeightError),

    #[error("strength display range [{min}, {max}] is invalid")]
    InvalidStrengthRange { min: f64, max: f64 },

    #[error("zone thresholds must lie in (0, 100]")]
    InvalidThresholds,

    #[error("consumer {consumer} has unknown topic {topic:?}")]
    InvalidTopic { consumer: String, topic: String },

    #[error("consumer name {0:?} is used more than once")]
    DuplicateConsumer(String),

    #[error("feed url is empty")]
    EmptyUrl,
}
