//! Port Interfaces
//!
//! Defines the transport contract the feed client depends on, following
//! the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Connector`: opens a full-duplex frame transport to an endpoint

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, Stream};

/// A transport-level frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text payload.
    Text(String),
    /// Keepalive ping.
    Ping,
    /// Keepalive pong.
    Pong,
    /// Close handshake.
    Close,
}

/// Failure on an established transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// I/O or protocol failure.
    #[error("transport I/O error: {0}")]
    Io(String),

    /// Transport already closed.
    #[error("transport closed")]
    Closed,
}

/// Failure to establish a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// Endpoint could not be reached.
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    /// Handshake was rejected.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Connect did not complete in time.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    /// Endpoint is not a valid address.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The connection was closed while the attempt was in flight.
    #[error("connect attempt superseded")]
    Superseded,
}

impl ConnectError {
    /// Short label used in logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unreachable(_) => "unreachable",
            Self::Handshake(_) => "handshake",
            Self::Timeout(_) => "timeout",
            Self::InvalidEndpoint(_) => "invalid_endpoint",
            Self::Superseded => "superseded",
        }
    }
}

/// Outbound half of a transport.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;

/// Inbound half of a transport.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// An established transport, split into its two halves.
pub struct Transport {
    /// Frames to the peer.
    pub sink: FrameSink,
    /// Frames from the peer; `None` when the peer is gone.
    pub stream: FrameStream,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

/// Port for opening streaming transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a transport to `endpoint`.
    async fn connect(&self, endpoint: &str) -> Result<Transport, ConnectError>;
}
