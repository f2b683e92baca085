use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use data_ingestion::config::{read_config, DashboardConfig, FEED_URL_ENV};
use data_ingestion::{ConsumerStore, FeedTransport, MessageRouter};
use tokio::sync::watch;
use tracing::{info, warn, Level};

const DEFAULT_CONFIG_PATH: &str = "dashboard.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config_found = Path::new(&config_path).exists();
    let config = if config_found {
        read_config(&config_path)?
    } else {
        DashboardConfig::default()
    };

    // Initialize logging before anything else reports
    let level: Level = config.log_level.parse().unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    info!("🚀 Starting market analytics feed core");
    if !config_found {
        warn!("{} not found, running with defaults", config_path);
    }

    let config = config.with_feed_url_override(std::env::var(FEED_URL_ENV).ok());
    config.validate()?;

    let router = Arc::new(MessageRouter::new());
    let transport = FeedTransport::new(config.feed.clone(), router.clone());
    let (settings_tx, settings_rx) = watch::channel(config.settings.clone());

    let mut stores = Vec::with_capacity(config.consumers.len());
    for profile in &config.consumers {
        let store = ConsumerStore::new(
            profile.clone(),
            &config,
            transport.outbox(),
            settings_rx.clone(),
        );
        store.register(&router)?;
        store.spawn_settings_watcher();
        spawn_analysis_logger(&store);
        stores.push(store);
    }
    info!(
        "Registered {} consumers for {}",
        router.consumer_count(),
        transport.url()
    );

    if let Err(e) = transport.connect().await {
        warn!("Initial connection failed: {} (retrying in background)", e);
    }

    tokio::signal::ctrl_c().await?;
    info!("👋 Shutting down gracefully...");

    transport.disconnect();
    for store in &stores {
        router.unregister_consumer(store.name());
    }
    drop(settings_tx);

    Ok(())
}

fn spawn_analysis_logger(store: &ConsumerStore) {
    let name = store.name().to_string();
    let mut analysis = store.subscribe_analysis();
    tokio::spawn(async move {
        while analysis.changed().await.is_ok() {
            let snapshot = analysis.borrow_and_update().clone();
            for (symbol, score) in &snapshot.scores {
                info!(
                    consumer = %name,
                    symbol = %symbol,
                    final_score = %score.final_score,
                    zone = ?score.zone,
                    boost = score.new_signal_boost,
                    "Score updated"
                );
            }
            if let Some(top) = snapshot.currency_strength.ranked().first() {
                info!(consumer = %name, currency = %top.currency, strength = top.strength, "Strongest currency");
            }
        }
    });
}
