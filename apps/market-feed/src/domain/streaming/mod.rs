//! Streaming Domain Types
//!
//! Topics, connection lifecycle states, and the typed events delivered to
//! feed listeners.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::quote::Quote;

// =============================================================================
// Identifiers
// =============================================================================

/// A market symbol (e.g. `BTCUSDT`).
pub type Symbol = String;

/// Topics whose payloads name their own symbols.
const OVERVIEW_CHANNEL: &str = "market";

/// A named stream of updates on the feed (e.g. `ticker.BTCUSDT`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Create a topic from any string-like value.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The topic name as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The symbol this topic is scoped to, if any.
    ///
    /// `ticker.BTCUSDT` names `BTCUSDT`. Overview topics such as
    /// `market.overview` carry symbols in their payloads and return `None`.
    #[must_use]
    pub fn symbol(&self) -> Option<Symbol> {
        let (channel, symbol) = self.0.split_once('.')?;
        if channel.is_empty() || symbol.is_empty() || channel == OVERVIEW_CHANNEL {
            return None;
        }
        Some(symbol.to_uppercase())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Topic {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of the feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Never connected.
    #[default]
    Idle,
    /// Connect attempt in flight.
    Connecting,
    /// Socket open; frames may be sent.
    Open,
    /// Caller-initiated close in progress.
    Closing,
    /// Socket closed (explicitly or after a failure).
    Closed,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    /// Whether frames may be sent in this state.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

// =============================================================================
// Feed Events
// =============================================================================

/// Why the feed reported an error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedFault {
    /// Connect attempt failed.
    #[error("connect failed: {0}")]
    Connect(String),
    /// Transport failed while the connection was open.
    #[error("transport error: {0}")]
    Transport(String),
    /// No pong within the heartbeat timeout.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,
    /// Peer closed the connection or the stream ended.
    #[error("connection closed by peer")]
    ClosedByPeer,
    /// The server reported an error frame.
    #[error("server error: {0}")]
    Server(String),
    /// Reconnection budget used up; fallback data is being served.
    #[error("reconnect attempts exhausted after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of retries scheduled before giving up.
        attempts: u32,
    },
}

/// Decoded quote content of a topic update.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum QuotePayload {
    /// Payload is not quote-shaped.
    #[default]
    None,
    /// A single ticker for one symbol.
    Single(Quote),
    /// A full market overview.
    Overview(Vec<Quote>),
}

/// An inbound update for one topic.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicUpdate {
    /// Topic the update was published on.
    pub topic: Topic,
    /// The payload exactly as received.
    pub params: serde_json::Value,
    /// Quotes decoded from the payload.
    pub quotes: QuotePayload,
}

impl TopicUpdate {
    /// The single quote carried by this update, if any.
    #[must_use]
    pub const fn quote(&self) -> Option<&Quote> {
        match &self.quotes {
            QuotePayload::Single(quote) => Some(quote),
            _ => None,
        }
    }
}

/// Event delivered to feed listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Connection opened.
    Connected,
    /// Connection closed.
    Disconnected,
    /// A failure was observed.
    Error(FeedFault),
    /// A topic update arrived.
    TopicUpdate(TopicUpdate),
}

impl FeedEvent {
    /// Short name used in logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error(_) => "error",
            Self::TopicUpdate(_) => "message",
        }
    }
}
