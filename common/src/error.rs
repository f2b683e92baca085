//! Errors raised while decoding feed data

use thiserror::Error;

use crate::message::MessageType;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("malformed feed message: {0}")]
    Malformed(String),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("invalid {message_type} payload: {source}")]
    InvalidPayload {
        message_type: MessageType,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown timeframe: {0}")]
    UnknownTimeframe(String),

    #[error("invalid bar time: {0}")]
    InvalidBarTime(String),

    #[error("unknown indicator: {0}")]
    UnknownIndicator(String),
}
