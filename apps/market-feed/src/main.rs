//! Market Feed Binary
//!
//! Runs the feed client, logs what it receives and serves health checks.
//!
//! # Usage
//!
//! ```bash
//! FEED_ENDPOINT=wss://feed.example.com/ws cargo run --bin market-feed
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `FEED_ENDPOINT`: `ws://` or `wss://` URL of the market-data feed
//!
//! ## Optional
//! - `FEED_TOPICS`: Comma-separated topics to subscribe at start
//! - `FEED_FALLBACK_SYMBOLS`: Symbols that always get a fallback quote (default: BTCUSDT,ETHUSDT)
//! - `FEED_FALLBACK_TIMEOUT_MS`: Wait for live data before falling back (default: 3000)
//! - `FEED_RECONNECT_DELAY_INITIAL_MS` / `FEED_RECONNECT_DELAY_MAX_MS`: Backoff bounds
//! - `FEED_RECONNECT_DELAY_MULTIPLIER`: Backoff growth (default: 2.0)
//! - `FEED_RECONNECT_JITTER`: Backoff jitter factor (default: 0)
//! - `FEED_MAX_RECONNECT_ATTEMPTS`: Retry budget, 0 = unlimited (default: 5)
//! - `FEED_HEARTBEAT_INTERVAL_SECS`: Ping interval, 0 = disabled (default: 30)
//! - `FEED_HEALTH_PORT`: Health check HTTP port, 0 = disabled (default: 8082)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use market_feed::infrastructure::health::{FeedStatusSource, HealthServer, HealthServerState};
use market_feed::infrastructure::telemetry;
use market_feed::{FeedClient, FeedConfig, FeedEvent, QuotePayload, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "failed to install rustls crypto provider")?;

    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting market feed");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus metrics unavailable");
    }

    let config = FeedConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let health_port = config.server.health_port;

    let client = Arc::new(FeedClient::new(
        config,
        Arc::new(market_feed::WebSocketConnector::new()),
    )?);
    register_listeners(&client);
    client.start()?;

    if health_port > 0 {
        let status_source: Arc<dyn FeedStatusSource> = client.clone();
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            status_source,
        ));
        let health_server = HealthServer::new(health_port, health_state, shutdown_token.clone());
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    tracing::info!("Market feed ready");

    await_shutdown(shutdown_token).await?;
    client.shutdown();

    tracing::info!("Market feed stopped");
    Ok(())
}

/// Log lifecycle events and a one-line summary of every update.
fn register_listeners(client: &FeedClient) {
    client.on("connected", |_| {
        tracing::info!("Feed connected");
        Ok(())
    });
    client.on("disconnected", |_| {
        tracing::warn!("Feed disconnected");
        Ok(())
    });
    client.on("error", |event| {
        if let FeedEvent::Error(fault) = event {
            tracing::error!(error = %fault, "Feed error");
        }
        Ok(())
    });
    client.on_update("*", |update| {
        match &update.quotes {
            QuotePayload::Single(quote) => tracing::debug!(
                topic = %update.topic,
                symbol = %quote.symbol,
                price = %quote.price,
                change_percent = %quote.change_percent_24h,
                "Quote"
            ),
            QuotePayload::Overview(quotes) => {
                tracing::debug!(topic = %update.topic, symbols = quotes.len(), "Overview");
            }
            QuotePayload::None => tracing::trace!(topic = %update.topic, "Update"),
        }
        Ok(())
    });
}

/// Log the parsed configuration.
fn log_config(config: &FeedConfig) {
    tracing::info!(
        endpoint = %config.endpoint,
        topics = config.initial_topics.len(),
        fallback_symbols = ?config.fallback.symbols,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        max_reconnect_attempts = config.websocket.max_reconnect_attempts,
        fallback_timeout_ms = u64::try_from(config.fallback.timeout.as_millis()).unwrap_or(u64::MAX),
        "Reconnect settings"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) -> std::io::Result<()> {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    #[cfg(unix)]
    let terminate = async move {
        terminate.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
    Ok(())
}
