use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use common::{DataType, FeedMessage, OutboundMessage, SubscriptionRequest, Timeframe};
use data_ingestion::config::FEED_URL_ENV;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};
use tracing_subscriber::fmt;

const DEFAULT_URL: &str = "ws://127.0.0.1:8765/feed";

/// Connects straight to a feed and reports what it sends.
///
/// Usage: feed_tally [url] [seconds] [symbol]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_max_level(tracing::Level::INFO).init();

    let mut args = std::env::args().skip(1);
    let url = args
        .next()
        .or_else(|| std::env::var(FEED_URL_ENV).ok())
        .unwrap_or_else(|| DEFAULT_URL.to_string());
    let seconds: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(30);
    let symbol = args.next().unwrap_or_else(|| "EURUSD".to_string());

    info!("Connecting to {}...", url);
    let (mut ws_stream, response) = tokio_tungstenite::connect_async(url.as_str()).await?;
    info!("✅ Connected, status {:?}", response.status());

    let subscribe = OutboundMessage::Subscribe(SubscriptionRequest {
        symbol: symbol.clone(),
        timeframe: Timeframe::H1,
        data_types: DataType::ALL.to_vec(),
    });
    let subscribe_json = serde_json::to_string(&subscribe)?;
    info!("Sending subscription: {}", subscribe_json);
    ws_stream.send(Message::Text(subscribe_json)).await?;

    info!("Listening for {} seconds...", seconds);
    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut malformed = 0usize;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        let next = match tokio::time::timeout(remaining, ws_stream.next()).await {
            Ok(next) => next,
            Err(_) => break,
        };

        match next {
            Some(Ok(Message::Text(text))) => match FeedMessage::decode(&text) {
                Ok(msg) => {
                    let kind = msg.message_type().to_string();
                    info!("{} {}", kind, msg.symbol().unwrap_or("-"));
                    *counts.entry(kind).or_default() += 1;
                }
                Err(e) => {
                    malformed += 1;
                    warn!("Undecodable frame: {}", e);
                }
            },
            Some(Ok(Message::Ping(_))) => info!("Received PING from server"),
            Some(Ok(Message::Close(frame))) => {
                info!("Server closed connection: {:?}", frame);
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!("WebSocket error: {}", e);
                break;
            }
            None => {
                info!("WebSocket stream ended");
                break;
            }
        }
    }

    let _ = ws_stream.close(None).await;

    for (kind, count) in &counts {
        info!("{:>26}: {}", kind, count);
    }
    info!(
        "Tally complete: {} messages, {} undecodable",
        counts.values().sum::<usize>(),
        malformed
    );
    Ok(())
}
