//! Typed pub/sub over the single feed connection.
//!
//! Consumers register under a unique name with a set of [`Topic`]s. Every
//! inbound [`FeedMessage`] is delivered once to each consumer whose topics
//! match its type, either directly or through the `*` wildcard. Lifecycle
//! events (connect, disconnect, error) go to every registered consumer.
//!
//! Handlers run behind a fault barrier: a returned error or a panic is logged
//! and the consumer stays registered. No registry lock is held while a
//! handler runs, so handlers may register or unregister consumers.

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;

use common::{FeedError, FeedMessage, MessageType};
use dashmap::DashMap;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::TransportError;

/// Normal websocket close code
pub const NORMAL_CLOSE_CODE: u16 = 1000;

/// A logical subscriber of the feed
pub trait FeedConsumer: Send + Sync {
    fn on_message(&self, message: &FeedMessage) -> anyhow::Result<()>;

    fn on_connect(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_disconnect(&self, _event: &DisconnectEvent) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_error(&self, _error: &TransportError) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Message-type interest of a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    /// `*`: every message type
    All,
    Only(MessageType),
}

impl FromStr for Topic {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "*" => Ok(Topic::All),
            other => other.parse().map(Topic::Only),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::All => f.write_str("*"),
            Topic::Only(t) => write!(f, "{}", t),
        }
    }
}

impl From<MessageType> for Topic {
    fn from(t: MessageType) -> Self {
        Topic::Only(t)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectEvent {
    pub connection_id: Uuid,
    pub code: u16,
    pub reason: String,
    /// Closed by a local `disconnect()`
    pub intentional: bool,
}

impl DisconnectEvent {
    pub fn is_normal(&self) -> bool {
        self.code == NORMAL_CLOSE_CODE
    }
}

struct Registration {
    consumer: Arc<dyn FeedConsumer>,
    topics: BTreeSet<Topic>,
}

/// Consumer registry and dispatcher
#[derive(Default)]
pub struct MessageRouter {
    consumers: DashMap<String, Registration>,
    routes: DashMap<Topic, BTreeSet<String>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `consumer` under `name`, replacing any previous registration
    pub fn register_consumer<I>(&self, name: &str, consumer: Arc<dyn FeedConsumer>, topics: I)
    where
        I: IntoIterator<Item = Topic>,
    {
        let topics: BTreeSet<Topic> = topics.into_iter().collect();

        if let Some((_, previous)) = self.consumers.remove(name) {
            debug!("Replacing registration for consumer {}", name);
            self.drop_routes(name, &previous.topics);
        }

        for topic in &topics {
            self.routes
                .entry(*topic)
                .or_default()
                .insert(name.to_string());
        }

        info!(
            "Registered consumer {} for [{}]",
            name,
            topics.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", ")
        );
        self.consumers
            .insert(name.to_string(), Registration { consumer, topics });
    }

    /// Returns false if no consumer was registered under `name`
    pub fn unregister_consumer(&self, name: &str) -> bool {
        match self.consumers.remove(name) {
            Some((_, registration)) => {
                self.drop_routes(name, &registration.topics);
                info!("Unregistered consumer {}", name);
                true
            }
            None => false,
        }
    }

    fn drop_routes(&self, name: &str, topics: &BTreeSet<Topic>) {
        for topic in topics {
            if let Some(mut names) = self.routes.get_mut(topic) {
                names.remove(name);
            }
            self.routes.remove_if(topic, |_, names| names.is_empty());
        }
    }

    /// Deliver to every interested consumer once; returns the number of
    /// handlers that completed without error
    pub fn route_message(&self, message: &FeedMessage) -> usize {
        let message_type = message.message_type();
        let targets = self.snapshot(self.consumers_for(message_type));

        if targets.is_empty() {
            debug!("No consumers for {}", message_type);
            return 0;
        }

        targets
            .iter()
            .filter(|(name, consumer)| {
                isolate(name, message_type.as_str(), || consumer.on_message(message))
            })
            .count()
    }

    /// Decode one raw text frame and route it; bad frames are dropped
    pub fn route_text(&self, raw: &str) -> usize {
        match FeedMessage::decode(raw) {
            Ok(message) => self.route_message(&message),
            Err(FeedError::UnknownType(t)) => {
                debug!("Ignoring message with unknown type {:?}", t);
                0
            }
            Err(e @ FeedError::InvalidPayload { .. }) => {
                warn!("Dropping message: {}", e);
                0
            }
            Err(e) => {
                warn!("Dropping malformed message: {} ({} bytes)", e, raw.len());
                0
            }
        }
    }

    pub fn notify_connect(&self) {
        for (name, consumer) in self.snapshot_all() {
            isolate(&name, "connect", || consumer.on_connect());
        }
    }

    pub fn notify_disconnect(&self, event: &DisconnectEvent) {
        for (name, consumer) in self.snapshot_all() {
            isolate(&name, "disconnect", || consumer.on_disconnect(event));
        }
    }

    pub fn notify_error(&self, err: &TransportError) {
        for (name, consumer) in self.snapshot_all() {
            isolate(&name, "error", || consumer.on_error(err));
        }
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Number of topics with at least one consumer
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.consumers.contains_key(name)
    }

    /// Names that would receive a message of this type, sorted
    pub fn consumers_for(&self, message_type: MessageType) -> Vec<String> {
        let mut names = BTreeSet::new();
        for topic in [Topic::Only(message_type), Topic::All] {
            if let Some(entry) = self.routes.get(&topic) {
                names.extend(entry.iter().cloned());
            }
        }
        names.into_iter().collect()
    }

    fn snapshot(&self, names: Vec<String>) -> Vec<(String, Arc<dyn FeedConsumer>)> {
        names
            .into_iter()
            .filter_map(|name| {
                let consumer = self.consumers.get(&name)?.consumer.clone();
                Some((name, consumer))
            })
            .collect()
    }

    fn snapshot_all(&self) -> Vec<(String, Arc<dyn FeedConsumer>)> {
        self.consumers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().consumer.clone()))
            .collect()
    }
}

fn isolate<F>(name: &str, event: &str, f: F) -> bool
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(consumer = name, "Handler for {} failed: {:#}", event, e);
            false
        }
        Err(panic) => {
            error!(
                consumer = name,
                "Handler for {} panicked: {}",
                event,
                panic_message(panic.as_ref())
            );
            false
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Weak;

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<MessageType>>,
        connects: AtomicUsize,
        disconnects: AtomicUsize,
        errors: AtomicUsize,
    }

    impl Recorder {
        fn received(&self) -> Vec<MessageType> {
            self.messages.lock().clone()
        }
    }

    impl FeedConsumer for Recorder {
        fn on_message(&self, message: &FeedMessage) -> anyhow::Result<()> {
            self.messages.lock().push(message.message_type());
            Ok(())
        }

        fn on_connect(&self) -> anyhow::Result<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_disconnect(&self, _event: &DisconnectEvent) -> anyhow::Result<()> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_error(&self, _error: &TransportError) -> anyhow::Result<()> {
            self.errors.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing {
        panic: bool,
    }

    impl FeedConsumer for Failing {
        fn on_message(&self, _message: &FeedMessage) -> anyhow::Result<()> {
            if self.panic {
                panic!("handler blew up");
            }
            anyhow::bail!("handler refused message")
        }

        fn on_connect(&self) -> anyhow::Result<()> {
            anyhow::bail!("connect hook failed")
        }
    }

    /// Unregisters itself on the first message it sees
    struct OneShot {
        router: Weak<MessageRouter>,
        hits: AtomicUsize,
    }

    impl FeedConsumer for OneShot {
        fn on_message(&self, _message: &FeedMessage) -> anyhow::Result<()> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            if let Some(router) = self.router.upgrade() {
                router.unregister_consumer("one-shot");
            }
            Ok(())
        }
    }

    fn pong() -> FeedMessage {
        FeedMessage::decode(r#"{"type":"pong"}"#).unwrap()
    }

    fn ticks() -> FeedMessage {
        FeedMessage::decode(r#"{"type":"ticks","data":[{"symbol":"EURUSD","bid":1.1}]}"#).unwrap()
    }

    fn disconnect_event() -> DisconnectEvent {
        DisconnectEvent {
            connection_id: Uuid::new_v4(),
            code: 1006,
            reason: "abnormal".to_string(),
            intentional: false,
        }
    }

    #[test]
    fn test_topic_parsing() {
        assert_eq!("*".parse::<Topic>().unwrap(), Topic::All);
        assert_eq!(
            "ohlc_update".parse::<Topic>().unwrap(),
            Topic::Only(MessageType::OhlcUpdate)
        );
        assert!("bogus".parse::<Topic>().is_err());
        assert_eq!(Topic::All.to_string(), "*");
    }

    #[test]
    fn test_specific_and_wildcard_delivered_once() {
        let router = MessageRouter::new();
        let both = Arc::new(Recorder::default());
        router.register_consumer(
            "both",
            both.clone(),
            [Topic::Only(MessageType::Ticks), Topic::All],
        );

        assert_eq!(router.route_message(&ticks()), 1);
        assert_eq!(both.received(), vec![MessageType::Ticks]);
    }

    #[test]
    fn test_routes_only_to_interested_consumers() {
        let router = MessageRouter::new();
        let tick_only = Arc::new(Recorder::default());
        let everything = Arc::new(Recorder::default());
        router.register_consumer("ticks", tick_only.clone(), [Topic::Only(MessageType::Ticks)]);
        router.register_consumer("all", everything.clone(), [Topic::All]);

        router.route_message(&pong());
        router.route_message(&ticks());

        assert_eq!(tick_only.received(), vec![MessageType::Ticks]);
        assert_eq!(everything.received(), vec![MessageType::Pong, MessageType::Ticks]);
        assert_eq!(
            router.consumers_for(MessageType::Ticks),
            vec!["all".to_string(), "ticks".to_string()]
        );
    }

    #[test]
    fn test_no_interested_consumers() {
        let router = MessageRouter::new();
        let recorder = Arc::new(Recorder::default());
        router.register_consumer("ticks", recorder.clone(), [Topic::Only(MessageType::Ticks)]);

        assert_eq!(router.route_message(&pong()), 0);
        assert!(recorder.received().is_empty());

        let empty = MessageRouter::new();
        assert_eq!(empty.route_message(&pong()), 0);
    }

    #[test]
    fn test_bad_frames_are_dropped() {
        let router = MessageRouter::new();
        let recorder = Arc::new(Recorder::default());
        router.register_consumer("all", recorder.clone(), [Topic::All]);

        assert_eq!(router.route_text("not json"), 0);
        assert_eq!(router.route_text("[1,2,3]"), 0);
        assert_eq!(router.route_text(r#"{"symbol":"EURUSD"}"#), 0);
        assert_eq!(router.route_text(r#"{"type":"news_flash"}"#), 0);
        assert_eq!(router.route_text(r#"{"type":"ohlc_update","symbol":"EURUSD"}"#), 0);
        assert!(recorder.received().is_empty());

        assert_eq!(router.route_text(r#"{"type":"pong"}"#), 1);
    }

    #[test]
    fn test_failing_handlers_are_isolated() {
        let router = MessageRouter::new();
        let healthy = Arc::new(Recorder::default());
        router.register_consumer("erroring", Arc::new(Failing { panic: false }), [Topic::All]);
        router.register_consumer("panicking", Arc::new(Failing { panic: true }), [Topic::All]);
        router.register_consumer("healthy", healthy.clone(), [Topic::All]);

        assert_eq!(router.route_message(&ticks()), 1);
        assert_eq!(router.route_message(&pong()), 1);
        assert_eq!(healthy.received().len(), 2);

        router.notify_connect();
        assert_eq!(healthy.connects.load(Ordering::SeqCst), 1);

        assert!(router.is_registered("erroring"));
        assert!(router.is_registered("panicking"));
        assert_eq!(router.consumer_count(), 3);
    }

    #[test]
    fn test_reregister_replaces_without_stale_routes() {
        let router = MessageRouter::new();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        router.register_consumer("dash", first.clone(), [Topic::Only(MessageType::Ticks)]);
        router.register_consumer("dash", second.clone(), [Topic::Only(MessageType::Pong)]);

        assert_eq!(router.consumer_count(), 1);
        assert_eq!(router.route_count(), 1);
        assert!(router.consumers_for(MessageType::Ticks).is_empty());

        router.route_message(&ticks());
        router.route_message(&pong());
        assert!(first.received().is_empty());
        assert_eq!(second.received(), vec![MessageType::Pong]);
    }

    #[test]
    fn test_unregister_prunes_routes() {
        let router = MessageRouter::new();
        router.register_consumer(
            "a",
            Arc::new(Recorder::default()),
            [Topic::Only(MessageType::Ticks), Topic::All],
        );
        router.register_consumer("b", Arc::new(Recorder::default()), [Topic::All]);
        assert_eq!(router.route_count(), 2);

        assert!(router.unregister_consumer("a"));
        assert_eq!(router.route_count(), 1);
        assert!(router.unregister_consumer("b"));
        assert_eq!(router.route_count(), 0);
        assert!(!router.unregister_consumer("b"));
    }

    #[test]
    fn test_consumer_may_unregister_itself_during_dispatch() {
        let router = Arc::new(MessageRouter::new());
        let one_shot = Arc::new(OneShot {
            router: Arc::downgrade(&router),
            hits: AtomicUsize::new(0),
        });
        let other = Arc::new(Recorder::default());
        router.register_consumer("one-shot", one_shot.clone(), [Topic::All]);
        router.register_consumer("other", other.clone(), [Topic::All]);

        router.route_message(&pong());
        router.route_message(&pong());

        assert_eq!(one_shot.hits.load(Ordering::SeqCst), 1);
        assert_eq!(other.received().len(), 2);
        assert!(!router.is_registered("one-shot"));
    }

    #[test]
    fn test_lifecycle_reaches_every_consumer() {
        let router = MessageRouter::new();
        let ticks_only = Arc::new(Recorder::default());
        let nothing = Arc::new(Recorder::default());
        router.register_consumer("ticks", ticks_only.clone(), [Topic::Only(MessageType::Ticks)]);
        router.register_consumer("quiet", nothing.clone(), Vec::new());

        router.notify_connect();
        router.notify_disconnect(&disconnect_event());
        router.notify_error(&TransportError::Cancelled);

        for recorder in [&ticks_only, &nothing] {
            assert_eq!(recorder.connects.load(Ordering::SeqCst), 1);
            assert_eq!(recorder.disconnects.load(Ordering::SeqCst), 1);
            assert_eq!(recorder.errors.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_disconnect_event_normal_code() {
        let mut event = disconnect_event();
        assert!(!event.is_normal());
        event.code = NORMAL_CLOSE_CODE;
        assert!(event.is_normal());
    }
}
