//! Feed wire messages.
//!
//! Inbound frames decode into the closed [`FeedMessage`] union. Each variant
//! has a matching [`MessageType`], which the router uses as its dispatch key.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bar::{Bar, BarTime};
use crate::error::FeedError;
use crate::signal::SignalDirection;
use crate::timeframe::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Connected,
    Subscribed,
    Unsubscribed,
    InitialOhlc,
    OhlcUpdate,
    Ticks,
    InitialIndicators,
    IndicatorUpdate,
    CurrencyStrengthUpdate,
    Pong,
    Error,
}

impl MessageType {
    pub const ALL: [MessageType; 11] = [
        MessageType::Connected,
        MessageType::Subscribed,
        MessageType::Unsubscribed,
        MessageType::InitialOhlc,
        MessageType::OhlcUpdate,
        MessageType::Ticks,
        MessageType::InitialIndicators,
        MessageType::IndicatorUpdate,
        MessageType::CurrencyStrengthUpdate,
        MessageType::Pong,
        MessageType::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Connected => "connected",
            MessageType::Subscribed => "subscribed",
            MessageType::Unsubscribed => "unsubscribed",
            MessageType::InitialOhlc => "initial_ohlc",
            MessageType::OhlcUpdate => "ohlc_update",
            MessageType::Ticks => "ticks",
            MessageType::InitialIndicators => "initial_indicators",
            MessageType::IndicatorUpdate => "indicator_update",
            MessageType::CurrencyStrengthUpdate => "currency_strength_update",
            MessageType::Pong => "pong",
            MessageType::Error => "error",
        }
    }
}

impl FromStr for MessageType {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| FeedError::UnknownType(s.to_string()))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound feed message
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    Connected(ConnectedMessage),
    Subscribed(SubscriptionAck),
    Unsubscribed(SubscriptionAck),
    InitialOhlc(OhlcHistory),
    OhlcUpdate(OhlcBarUpdate),
    Ticks(TickBatch),
    InitialIndicators(IndicatorSnapshot),
    IndicatorUpdate(IndicatorSnapshot),
    CurrencyStrengthUpdate(StrengthSnapshot),
    Pong(PongMessage),
    Error(ErrorMessage),
}

/// Greeting sent by the feed once the socket is open
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectedMessage {
    #[serde(default)]
    pub supported_timeframes: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionAck {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub timeframe: Option<String>,
    #[serde(default)]
    pub data_types: Vec<String>,
}

/// Full bar history seed for one symbol and timeframe
#[derive(Debug, Clone, Deserialize)]
pub struct OhlcHistory {
    pub symbol: String,
    pub timeframe: String,
    #[serde(default)]
    pub data: Vec<Bar>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OhlcBarUpdate {
    pub symbol: String,
    pub timeframe: String,
    pub data: Bar,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickBatch {
    #[serde(default)]
    pub data: Vec<Tick>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub bid: f64,
    #[serde(default)]
    pub ask: Option<f64>,
    #[serde(default)]
    pub time: Option<BarTime>,
}

impl Tick {
    pub fn mid(&self) -> f64 {
        match self.ask {
            Some(ask) => (self.bid + ask) / 2.0,
            None => self.bid,
        }
    }
}

/// Per-symbol, per-timeframe indicator readings
#[derive(Debug, Clone, Deserialize)]
pub struct IndicatorSnapshot {
    pub symbol: String,
    pub timeframe: String,
    #[serde(default)]
    pub data: IndicatorData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndicatorData {
    /// Open time of the closed bar the readings belong to
    #[serde(default)]
    pub bar_time: Option<BarTime>,
    /// Keyed by the feed's indicator name; unknown names are ignored downstream
    #[serde(default)]
    pub signals: BTreeMap<String, SignalDirection>,
    #[serde(default)]
    pub new_signals: BTreeMap<String, bool>,
    #[serde(default)]
    pub quiet_market: Option<bool>,
    #[serde(default)]
    pub atr: Option<f64>,
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
}

/// Server-computed currency strength, keyed by currency code
#[derive(Debug, Clone, Deserialize)]
pub struct StrengthSnapshot {
    #[serde(default)]
    pub timeframe: Option<String>,
    #[serde(default)]
    pub data: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PongMessage {
    #[serde(default)]
    pub timestamp: Option<BarTime>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorMessage {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

impl FeedMessage {
    /// Decode one raw text frame.
    ///
    /// Non-objects and objects without a string `type` are
    /// [`FeedError::Malformed`]; a well-formed object with a type this crate
    /// does not know is [`FeedError::UnknownType`].
    pub fn decode(text: &str) -> Result<FeedMessage, FeedError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FeedError::Malformed(e.to_string()))?;

        let message_type = match &value {
            Value::Object(map) => match map.get("type") {
                Some(Value::String(t)) => t.parse::<MessageType>()?,
                Some(_) => return Err(FeedError::Malformed("`type` is not a string".to_string())),
                None => return Err(FeedError::Malformed("missing `type`".to_string())),
            },
            _ => return Err(FeedError::Malformed("not a JSON object".to_string())),
        };

        serde_json::from_value(value).map_err(|source| FeedError::InvalidPayload {
            message_type,
            source,
        })
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            FeedMessage::Connected(_) => MessageType::Connected,
            FeedMessage::Subscribed(_) => MessageType::Subscribed,
            FeedMessage::Unsubscribed(_) => MessageType::Unsubscribed,
            FeedMessage::InitialOhlc(_) => MessageType::InitialOhlc,
            FeedMessage::OhlcUpdate(_) => MessageType::OhlcUpdate,
            FeedMessage::Ticks(_) => MessageType::Ticks,
            FeedMessage::InitialIndicators(_) => MessageType::InitialIndicators,
            FeedMessage::IndicatorUpdate(_) => MessageType::IndicatorUpdate,
            FeedMessage::CurrencyStrengthUpdate(_) => MessageType::CurrencyStrengthUpdate,
            FeedMessage::Pong(_) => MessageType::Pong,
            FeedMessage::Error(_) => MessageType::Error,
        }
    }

    pub fn symbol(&self) -> Option<&str> {
        match self {
            FeedMessage::Subscribed(ack) | FeedMessage::Unsubscribed(ack) => ack.symbol.as_deref(),
            FeedMessage::InitialOhlc(m) => Some(&m.symbol),
            FeedMessage::OhlcUpdate(m) => Some(&m.symbol),
            FeedMessage::InitialIndicators(m) | FeedMessage::IndicatorUpdate(m) => Some(&m.symbol),
            FeedMessage::Connected(_)
            | FeedMessage::Ticks(_)
            | FeedMessage::CurrencyStrengthUpdate(_)
            | FeedMessage::Pong(_)
            | FeedMessage::Error(_) => None,
        }
    }
}

/// Data streams a subscription asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Ohlc,
    Ticks,
    Indicators,
    CurrencyStrength,
}

impl DataType {
    pub const ALL: [DataType; 4] = [
        DataType::Ohlc,
        DataType::Ticks,
        DataType::Indicators,
        DataType::CurrencyStrength,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionRequest {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub data_types: Vec<DataType>,
}

/// Outbound client message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OutboundMessage {
    Subscribe(SubscriptionRequest),
    Unsubscribe(SubscriptionRequest),
    Ping,
}

impl OutboundMessage {
    pub fn action(&self) -> &'static str {
        match self {
            OutboundMessage::Subscribe(_) => "subscribe",
            OutboundMessage::Unsubscribe(_) => "unsubscribe",
            OutboundMessage::Ping => "ping",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ohlc_update() {
        let json = r#"{
            "type": "ohlc_update",
            "symbol": "EURUSD",
            "timeframe": "H1",
            "data": {"time": 1700000000, "open": 1.08, "high": 1.09, "low": 1.07, "close": 1.085}
        }"#;

        match FeedMessage::decode(json).unwrap() {
            FeedMessage::OhlcUpdate(update) => {
                assert_eq!(update.symbol, "EURUSD");
                assert_eq!(update.timeframe, "H1");
                assert_eq!(update.data.close, 1.085);
            }
            other => panic!("Expected OhlcUpdate, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_indicator_update() {
        let json = r#"{
            "type": "indicator_update",
            "symbol": "GBPUSD",
            "timeframe": "4H",
            "data": {
                "bar_time": "2024-01-02T08:00:00Z",
                "signals": {"macd": "buy", "rsi": "neutral", "utbot": "sell"},
                "new_signals": {"macd": true},
                "quiet_market": false,
                "atr": 0.0021,
                "values": {"rsi": 54.2}
            }
        }"#;

        let message = FeedMessage::decode(json).unwrap();
        assert_eq!(message.message_type(), MessageType::IndicatorUpdate);
        assert_eq!(message.symbol(), Some("GBPUSD"));
        match message {
            FeedMessage::IndicatorUpdate(snapshot) => {
                assert_eq!(snapshot.data.signals["macd"], SignalDirection::Buy);
                assert_eq!(snapshot.data.new_signals.get("macd"), Some(&true));
                assert_eq!(snapshot.data.quiet_market, Some(false));
            }
            other => panic!("Expected IndicatorUpdate, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_bare_pong() {
        let message = FeedMessage::decode(r#"{"type": "pong"}"#).unwrap();
        assert_eq!(message.message_type(), MessageType::Pong);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(matches!(FeedMessage::decode("not json"), Err(FeedError::Malformed(_))));
        assert!(matches!(FeedMessage::decode("[1, 2]"), Err(FeedError::Malformed(_))));
        assert!(matches!(
            FeedMessage::decode(r#"{"symbol": "EURUSD"}"#),
            Err(FeedError::Malformed(_))
        ));
        assert!(matches!(
            FeedMessage::decode(r#"{"type": 7}"#),
            Err(FeedError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_unknown_type() {
        match FeedMessage::decode(r#"{"type": "news_flash", "data": {}}"#) {
            Err(FeedError::UnknownType(t)) => assert_eq!(t, "news_flash"),
            other => panic!("Expected UnknownType, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_invalid_payload() {
        let result = FeedMessage::decode(r#"{"type": "ohlc_update", "symbol": "EURUSD"}"#);
        assert!(matches!(
            result,
            Err(FeedError::InvalidPayload { message_type: MessageType::OhlcUpdate, .. })
        ));
    }

    #[test]
    fn test_outbound_subscription_shape() {
        let msg = OutboundMessage::Subscribe(SubscriptionRequest {
            symbol: "EURUSD".to_string(),
            timeframe: Timeframe::H1,
            data_types: vec![DataType::Ohlc, DataType::Indicators],
        });

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "action": "subscribe",
                "symbol": "EURUSD",
                "timeframe": "H1",
                "data_types": ["ohlc", "indicators"]
            })
        );
        assert_eq!(
            serde_json::to_string(&OutboundMessage::Ping).unwrap(),
            r#"{"action":"ping"}"#
        );
    }
}
