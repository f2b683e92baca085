use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use common::OutboundMessage;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::FeedConfig;
use crate::error::TransportError;
use crate::event_bus::{DisconnectEvent, MessageRouter, NORMAL_CLOSE_CODE};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Close code reported when the socket dies without a close frame
const ABNORMAL_CLOSE_CODE: u16 = 1006;
/// Close frame carried no status code
const NO_STATUS_CODE: u16 = 1005;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32, last_error: String },
    /// Reconnect attempts exhausted
    Failed { reason: String },
}

/// `base * 2^(attempt - 1)` for 1-based attempts
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

enum Command {
    Send(String),
    Close,
}

/// Resolves a pending `connect()` call
type OpenWaiter = oneshot::Sender<Result<(), TransportError>>;

struct Inner {
    config: FeedConfig,
    router: Arc<MessageRouter>,
    state_tx: watch::Sender<ConnectionState>,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    /// `connect()` calls waiting on the next open, or on a failed one
    waiters: Mutex<Vec<OpenWaiter>>,
    /// Bumped on every connect/disconnect; stale supervisors stop publishing state
    generation: AtomicU64,
}

impl Inner {
    fn publish(&self, generation: u64, state: ConnectionState) {
        if self.generation.load(Ordering::SeqCst) == generation {
            self.state_tx.send_replace(state);
        }
    }

    /// Publish `state` (if any) and resolve every waiter in one step, so a
    /// `connect()` never misses an outcome that lands while it registers
    fn settle<F>(&self, generation: u64, state: Option<ConnectionState>, outcome: F)
    where
        F: Fn() -> Result<(), TransportError>,
    {
        let mut waiters = self.waiters.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        if let Some(state) = state {
            self.state_tx.send_replace(state);
        }
        for waiter in waiters.drain(..) {
            let _ = waiter.send(outcome());
        }
    }

    fn is_connected(&self) -> bool {
        matches!(*self.state_tx.borrow(), ConnectionState::Connected)
    }

    fn send(&self, message: &OutboundMessage) -> bool {
        if !self.is_connected() {
            warn!("Not connected, dropping outbound {}", message.action());
            return false;
        }

        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                warn!("{}", TransportError::Encode(e));
                return false;
            }
        };

        match self.commands.lock().as_ref() {
            Some(tx) => tx.send(Command::Send(text)).is_ok(),
            None => {
                warn!("No live session, dropping outbound {}", message.action());
                false
            }
        }
    }
}

/// Owns the single feed socket
///
/// Cloning is cheap and every clone drives the same connection.
#[derive(Clone)]
pub struct FeedTransport {
    inner: Arc<Inner>,
}

impl FeedTransport {
    pub fn new(config: FeedConfig, router: Arc<MessageRouter>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                router,
                state_tx,
                commands: Mutex::new(None),
                waiters: Mutex::new(Vec::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.config.url
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.inner.router
    }

    /// Resolves once the socket is open, and rejects if an open attempt fails
    /// first. Calling it while a session is already live returns immediately.
    /// A failed open leaves the supervisor retrying in the background.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let opened = {
            let mut commands = self.inner.commands.lock();
            let mut waiters = self.inner.waiters.lock();
            let state = self.inner.state_tx.borrow().clone();
            if state == ConnectionState::Connected {
                return Ok(());
            }

            let live = commands.as_ref().is_some_and(|tx| !tx.is_closed())
                && matches!(
                    state,
                    ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
                );

            let (tx, rx) = oneshot::channel();
            waiters.push(tx);

            if !live {
                let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
                *commands = Some(cmd_tx);
                self.inner.state_tx.send_replace(ConnectionState::Connecting);
                tokio::spawn(supervise(self.inner.clone(), generation, cmd_rx));
            }
            rx
        };

        opened.await.unwrap_or(Err(TransportError::Cancelled))
    }

    /// Close with the normal code. No reconnect until `connect()` is called again.
    pub fn disconnect(&self) {
        let mut commands = self.inner.commands.lock();
        if let Some(tx) = commands.take() {
            let mut waiters = self.inner.waiters.lock();
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(Command::Close);
            self.inner.state_tx.send_replace(ConnectionState::Disconnected);
            for waiter in waiters.drain(..) {
                let _ = waiter.send(Err(TransportError::Cancelled));
            }
            info!(url = %self.inner.config.url, "Disconnect requested");
        }
    }

    /// Returns false, with a warning, when the message could not be queued
    pub fn send(&self, message: &OutboundMessage) -> bool {
        self.inner.send(message)
    }

    /// A handle consumers can hold to send without owning the transport
    pub fn outbox(&self) -> FeedSender {
        FeedSender {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }
}

/// Weak send handle onto a [`FeedTransport`]
#[derive(Clone, Default)]
pub struct FeedSender {
    inner: Weak<Inner>,
}

impl FeedSender {
    /// A sender that is never connected
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn send(&self, message: &OutboundMessage) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.send(message),
            None => {
                warn!("Transport dropped, discarding outbound {}", message.action());
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.upgrade().is_some_and(|inner| inner.is_connected())
    }
}

/// Reconnect loop for one `connect()` generation
async fn supervise(
    inner: Arc<Inner>,
    generation: u64,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let url = inner.config.url.clone();
    let base_delay = inner.config.base_delay();
    let max_attempts = inner.config.max_reconnect_attempts;
    let mut attempt: u32 = 0;
    let mut last_error = String::new();

    loop {
        if attempt > 0 {
            if attempt > max_attempts {
                let err = TransportError::ReconnectExhausted {
                    attempts: max_attempts,
                };
                error!(url = %url, "{}", err);
                inner.settle(
                    generation,
                    Some(ConnectionState::Failed {
                        reason: err.to_string(),
                    }),
                    || {
                        Err(TransportError::ReconnectExhausted {
                            attempts: max_attempts,
                        })
                    },
                );
                inner.router.notify_error(&err);
                return;
            }

            let delay = backoff_delay(base_delay, attempt);
            inner.publish(
                generation,
                ConnectionState::Reconnecting {
                    attempt,
                    last_error: last_error.clone(),
                },
            );
            info!(
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                url = %url,
                "Reconnecting to feed"
            );

            tokio::select! {
                _ = sleep(delay) => {}
                _ = wait_for_close(&mut commands) => {
                    debug!(url = %url, "Reconnect cancelled");
                    return;
                }
            }
        }

        info!(url = %url, "Connecting to feed");
        let connected = tokio::select! {
            result = tokio_tungstenite::connect_async(url.as_str()) => result,
            _ = wait_for_close(&mut commands) => {
                debug!(url = %url, "Connect cancelled");
                return;
            }
        };

        let ws_stream = match connected {
            Ok((stream, response)) => {
                debug!("Response status: {:?}", response.status());
                stream
            }
            Err(e) => {
                let err = TransportError::Connect {
                    url: url.clone(),
                    reason: e.to_string(),
                };
                error!(url = %url, attempt = attempt, "{}", err);
                last_error = err.to_string();
                inner.settle(generation, None, || {
                    Err(TransportError::Connect {
                        url: url.clone(),
                        reason: last_error.clone(),
                    })
                });
                inner.router.notify_error(&err);
                attempt = attempt.saturating_add(1);
                continue;
            }
        };

        let connection_id = Uuid::new_v4();
        attempt = 0;
        inner.publish(generation, ConnectionState::Connected);
        info!(url = %url, connection_id = %connection_id, "Connected to feed");
        inner.router.notify_connect();
        // consumers have subscribed by the time `connect()` resolves
        inner.settle(generation, None, || Ok(()));

        let (write, read) = ws_stream.split();
        let event = run_session(&inner, connection_id, write, read, &mut commands).await;

        info!(
            connection_id = %connection_id,
            code = event.code,
            reason = %event.reason,
            "Feed connection closed"
        );
        inner.router.notify_disconnect(&event);

        if event.intentional {
            return;
        }
        if event.is_normal() {
            inner.settle(generation, Some(ConnectionState::Disconnected), || {
                Err(TransportError::Cancelled)
            });
            return;
        }

        last_error = event.reason;
        attempt = 1;
    }
}

async fn wait_for_close(commands: &mut mpsc::UnboundedReceiver<Command>) {
    loop {
        match commands.recv().await {
            Some(Command::Close) | None => return,
            Some(Command::Send(_)) => debug!("No live session, dropping queued send"),
        }
    }
}

/// Read loop for one socket; routing happens inline so messages are handled
/// in delivery order
async fn run_session(
    inner: &Inner,
    connection_id: Uuid,
    mut write: WsSink,
    mut read: WsStream,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> DisconnectEvent {
    let period = inner.config.heartbeat_interval();
    let mut heartbeat = interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let closed = |code: u16, reason: String, intentional: bool| DisconnectEvent {
        connection_id,
        code,
        reason,
        intentional,
    };

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    inner.router.route_text(&text);
                }
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = write.send(Message::Pong(payload)).await {
                        return socket_failure(inner, e, closed);
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    debug!(connection_id = %connection_id, "Received PONG frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((NO_STATUS_CODE, String::new()));
                    info!(connection_id = %connection_id, code = code, "Feed closed the socket");
                    return closed(code, reason, false);
                }
                Some(Ok(Message::Binary(data))) => {
                    warn!("Received unexpected binary message: {} bytes", data.len());
                }
                Some(Ok(Message::Frame(_))) => {
                    debug!("Received raw frame");
                }
                Some(Err(e)) => {
                    return socket_failure(inner, e, closed);
                }
                None => {
                    return closed(ABNORMAL_CLOSE_CODE, "stream ended".to_string(), false);
                }
            },
            command = commands.recv() => match command {
                Some(Command::Send(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        return socket_failure(inner, e, closed);
                    }
                }
                Some(Command::Close) | None => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client disconnect".into(),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        debug!("Close frame not delivered: {}", e);
                    }
                    return closed(NORMAL_CLOSE_CODE, "client disconnect".to_string(), true);
                }
            },
            _ = heartbeat.tick() => {
                if let Ok(text) = serde_json::to_string(&OutboundMessage::Ping) {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        return socket_failure(inner, e, closed);
                    }
                    debug!(connection_id = %connection_id, "Sent ping heartbeat");
                }
            }
        }
    }
}

fn socket_failure<F>(
    inner: &Inner,
    e: tokio_tungstenite::tungstenite::Error,
    closed: F,
) -> DisconnectEvent
where
    F: Fn(u16, String, bool) -> DisconnectEvent,
{
    let err = TransportError::Socket(e);
    error!("{}", err);
    let reason = err.to_string();
    inner.router.notify_error(&err);
    closed(ABNORMAL_CLOSE_CODE, reason, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 4), Duration::from_millis(4000));
        // never panics on silly attempt counts
        assert!(backoff_delay(base, 200) >= backoff_delay(base, 30));
    }

    #[tokio::test]
    async fn test_send_when_disconnected_is_noop() {
        let transport = FeedTransport::new(FeedConfig::default(), Arc::new(MessageRouter::new()));
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert!(!transport.send(&OutboundMessage::Ping));
        assert!(!transport.outbox().send(&OutboundMessage::Ping));
        // disconnect without a session is harmless
        transport.disconnect();
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_detached_sender() {
        let sender = FeedSender::detached();
        assert!(!sender.is_connected());
        assert!(!sender.send(&OutboundMessage::Ping));
    }
}
