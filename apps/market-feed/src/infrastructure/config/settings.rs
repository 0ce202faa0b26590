//! Feed Configuration Settings
//!
//! Configuration types for the feed client, loaded from environment
//! variables.

use std::str::FromStr;
use std::time::Duration;

use crate::domain::streaming::{Symbol, Topic};

/// WebSocket connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct WebSocketSettings {
    /// Upper bound on one connect attempt.
    pub connect_timeout: Duration,
    /// Heartbeat ping interval (`None` = heartbeats disabled).
    pub heartbeat_interval: Option<Duration>,
    /// Heartbeat timeout before considering connection dead.
    pub heartbeat_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Random spread applied to each delay, 0.0..=1.0 (0 = none).
    pub reconnect_jitter: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Outbound frames that may be queued before sends fail.
    pub outbound_capacity: usize,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Some(Duration::from_secs(30)),
            heartbeat_timeout: Duration::from_secs(60),
            reconnect_delay_initial: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            reconnect_jitter: 0.0,
            max_reconnect_attempts: 5,
            outbound_capacity: 256,
        }
    }
}

/// Fallback data settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackSettings {
    /// How long to wait for live data before serving fallback quotes.
    pub timeout: Duration,
    /// Symbols that always get a fallback quote.
    pub symbols: Vec<Symbol>,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(3000),
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8082 }
    }
}

/// Complete feed configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    /// `ws://` or `wss://` endpoint of the feed.
    pub endpoint: String,
    /// Topics subscribed from the start.
    pub initial_topics: Vec<Topic>,
    /// WebSocket connection settings.
    pub websocket: WebSocketSettings,
    /// Fallback data settings.
    pub fallback: FallbackSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl FeedConfig {
    /// Create configuration for `endpoint` with defaults everywhere else.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            initial_topics: Vec::new(),
            websocket: WebSocketSettings::default(),
            fallback: FallbackSettings::default(),
            server: ServerSettings::default(),
        }
    }

    /// Set the initial topics.
    #[must_use]
    pub fn with_topics<I, T>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Topic>,
    {
        self.initial_topics = topics.into_iter().map(Into::into).collect();
        self
    }

    /// Set the symbols that always get a fallback quote.
    #[must_use]
    pub fn with_fallback_symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.fallback.symbols = symbols
            .into_iter()
            .map(|s| s.as_ref().trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        self
    }

    /// Set the fallback watchdog timeout.
    #[must_use]
    pub const fn with_fallback_timeout(mut self, timeout: Duration) -> Self {
        self.fallback.timeout = timeout;
        self
    }

    /// Replace the WebSocket settings.
    #[must_use]
    pub fn with_websocket(mut self, websocket: WebSocketSettings) -> Self {
        self.websocket = websocket;
        self
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `FEED_ENDPOINT` is missing or empty, is not a
    /// WebSocket URL, or any numeric variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let endpoint = lookup("FEED_ENDPOINT")
            .ok_or_else(|| ConfigError::MissingEnvVar("FEED_ENDPOINT".to_string()))?
            .trim()
            .to_string();

        if endpoint.is_empty() {
            return Err(ConfigError::EmptyValue("FEED_ENDPOINT".to_string()));
        }
        if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue {
                key: "FEED_ENDPOINT".to_string(),
                value: endpoint,
            });
        }

        let mut config = Self::new(endpoint);

        if let Some(topics) = lookup("FEED_TOPICS") {
            config.initial_topics = split_list(&topics).map(Topic::new).collect();
        }
        if let Some(symbols) = lookup("FEED_FALLBACK_SYMBOLS") {
            config = config.with_fallback_symbols(split_list(&symbols));
        }
        config.fallback.timeout = parse_millis(
            &lookup,
            "FEED_FALLBACK_TIMEOUT_MS",
            config.fallback.timeout,
        )?;

        let defaults = WebSocketSettings::default();
        let heartbeat_secs: u64 = parse_or(
            &lookup,
            "FEED_HEARTBEAT_INTERVAL_SECS",
            defaults.heartbeat_interval.map_or(0, |d| d.as_secs()),
        )?;

        config.websocket = WebSocketSettings {
            connect_timeout: parse_secs(
                &lookup,
                "FEED_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout,
            )?,
            heartbeat_interval: (heartbeat_secs > 0).then(|| Duration::from_secs(heartbeat_secs)),
            heartbeat_timeout: parse_secs(
                &lookup,
                "FEED_HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout,
            )?,
            reconnect_delay_initial: parse_millis(
                &lookup,
                "FEED_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            )?,
            reconnect_delay_max: parse_millis(
                &lookup,
                "FEED_RECONNECT_DELAY_MAX_MS",
                defaults.reconnect_delay_max,
            )?,
            reconnect_delay_multiplier: parse_or(
                &lookup,
                "FEED_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            )?,
            reconnect_jitter: parse_or(
                &lookup,
                "FEED_RECONNECT_JITTER",
                defaults.reconnect_jitter,
            )?,
            max_reconnect_attempts: parse_or(
                &lookup,
                "FEED_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            )?,
            outbound_capacity: parse_or(
                &lookup,
                "FEED_OUTBOUND_CAPACITY",
                defaults.outbound_capacity,
            )?,
        };

        config.server = ServerSettings {
            health_port: parse_or(
                &lookup,
                "FEED_HEALTH_PORT",
                ServerSettings::default().health_port,
            )?,
        };

        Ok(config)
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key).map(|v| v.trim().to_string()) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: v,
        }),
    }
}

fn parse_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    parse_or(lookup, key, default.as_secs()).map(Duration::from_secs)
}

fn parse_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let default = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_or(lookup, key, default).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<FeedConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        FeedConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn endpoint_is_required() {
        assert_eq!(
            from_pairs(&[]),
            Err(ConfigError::MissingEnvVar("FEED_ENDPOINT".to_string()))
        );
        assert_eq!(
            from_pairs(&[("FEED_ENDPOINT", " ")]),
            Err(ConfigError::EmptyValue("FEED_ENDPOINT".to_string()))
        );
    }

    #[test]
    fn endpoint_must_be_websocket() {
        assert!(matches!(
            from_pairs(&[("FEED_ENDPOINT", "https://feed.example.com")]),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn defaults_apply() {
        let config = from_pairs(&[("FEED_ENDPOINT", "wss://feed.example.com/ws")]).unwrap();

        assert_eq!(config, FeedConfig::new("wss://feed.example.com/ws"));
        assert_eq!(config.fallback.timeout, Duration::from_millis(3000));
        assert_eq!(config.fallback.symbols, vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(config.server.health_port, 8082);
    }

    #[test]
    fn websocket_settings_defaults() {
        let settings = WebSocketSettings::default();
        assert_eq!(settings.heartbeat_interval, Some(Duration::from_secs(30)));
        assert_eq!(settings.heartbeat_timeout, Duration::from_secs(60));
        assert_eq!(settings.reconnect_delay_initial, Duration::from_millis(1000));
        assert_eq!(settings.reconnect_delay_max, Duration::from_secs(30));
        assert!((settings.reconnect_delay_multiplier - 2.0).abs() < f64::EPSILON);
        assert!(settings.reconnect_jitter.abs() < f64::EPSILON);
        assert_eq!(settings.max_reconnect_attempts, 5);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = from_pairs(&[
            ("FEED_ENDPOINT", "ws://localhost:9000"),
            ("FEED_TOPICS", "ticker.BTCUSDT, market.overview,,"),
            ("FEED_FALLBACK_SYMBOLS", "solusdt"),
            ("FEED_FALLBACK_TIMEOUT_MS", "500"),
            ("FEED_RECONNECT_DELAY_INITIAL_MS", "250"),
            ("FEED_RECONNECT_DELAY_MAX_MS", "4000"),
            ("FEED_RECONNECT_DELAY_MULTIPLIER", "1.5"),
            ("FEED_RECONNECT_JITTER", "0.2"),
            ("FEED_MAX_RECONNECT_ATTEMPTS", "0"),
            ("FEED_HEARTBEAT_INTERVAL_SECS", "0"),
            ("FEED_OUTBOUND_CAPACITY", "16"),
            ("FEED_HEALTH_PORT", "0"),
        ])
        .unwrap();

        assert_eq!(
            config.initial_topics,
            vec![Topic::from("ticker.BTCUSDT"), Topic::from("market.overview")]
        );
        assert_eq!(config.fallback.symbols, vec!["SOLUSDT"]);
        assert_eq!(config.fallback.timeout, Duration::from_millis(500));
        assert_eq!(config.websocket.reconnect_delay_initial, Duration::from_millis(250));
        assert_eq!(config.websocket.reconnect_delay_max, Duration::from_millis(4000));
        assert!((config.websocket.reconnect_delay_multiplier - 1.5).abs() < f64::EPSILON);
        assert!((config.websocket.reconnect_jitter - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.websocket.max_reconnect_attempts, 0);
        assert_eq!(config.websocket.heartbeat_interval, None);
        assert_eq!(config.websocket.outbound_capacity, 16);
        assert_eq!(config.server.health_port, 0);
    }

    #[test]
    fn malformed_number_is_rejected() {
        assert_eq!(
            from_pairs(&[
                ("FEED_ENDPOINT", "ws://localhost:9000"),
                ("FEED_MAX_RECONNECT_ATTEMPTS", "many"),
            ]),
            Err(ConfigError::InvalidValue {
                key: "FEED_MAX_RECONNECT_ATTEMPTS".to_string(),
                value: "many".to_string(),
            })
        );
    }
}
