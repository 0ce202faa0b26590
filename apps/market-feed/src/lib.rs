#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::option_if_let_else,
        clippy::items_after_statements
    )
)]

//! Market Feed - Real-Time Market Data Client
//!
//! Keeps a single streaming connection to a market-data source, replays
//! topic subscriptions after every reconnect, routes updates to listeners
//! and falls back to a synthetic snapshot while live data is unavailable.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core feed logic and data types
//!   - `streaming`: Topics, connection states, feed events
//!   - `quote`: Quotes and the snapshot book
//!   - `subscription`: Desired and active topic tracking
//!   - `fallback`: Fallback state machine and synthetic quotes
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Transport connector interface
//!   - `services`: Event dispatch to listeners
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: Connection, codec, heartbeat, reconnect and the client
//!   - `websocket`: `tokio-tungstenite` connector
//!   - `config`: Configuration from the environment
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                ┌────────────┐    ┌───────┐    ┌────────────┐
//! Feed WS ──────►│ Connection │───►│ Codec │───►│ Dispatcher │──► listeners
//!                └────────────┘    └───┬───┘    └────────────┘
//!                      ▲               │
//!   Reconnector ───────┘               ▼
//!   Watchdog ──► Fallback Source ──► QuoteBook ──► snapshot()
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core feed types with no I/O.
pub mod domain;

/// Application layer - Ports and services.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::fallback::{FallbackState, ReferenceQuote};
pub use domain::quote::{Quote, QuoteOrigin};
pub use domain::streaming::{
    ConnectionState, FeedEvent, FeedFault, QuotePayload, Symbol, Topic, TopicUpdate,
};

// Ports and services
pub use application::ports::{ConnectError, Connector, Frame, Transport, TransportError};
pub use application::services::{Channel, ListenerHandle};

// Feed client
pub use infrastructure::feed::{
    ConnectionError, FeedClient, FeedClientError, FeedStatus, ReconnectConfig, ReconnectPolicy,
};
pub use infrastructure::websocket::WebSocketConnector;

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, FallbackSettings, FeedConfig, ServerSettings, WebSocketSettings,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
