//! Feed Connection
//!
//! Owns the lifecycle state of the single streaming socket and the bounded
//! outbound queue that feeds it.
//!
//! # Lifecycle
//!
//! ```text
//! Idle/Closed ──open──▶ Connecting ──ok──▶ Open ──fail──▶ Closed
//!                           │                 │
//!                           └──err──▶ Closed  └──close──▶ Closing ──▶ Closed
//! ```
//!
//! Every `open` starts a new epoch. Frames and failures are tagged with the
//! epoch they belong to; anything tagged with a superseded epoch is ignored.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::application::ports::{ConnectError, Connector, Frame, Transport};
use crate::domain::streaming::ConnectionState;

/// Sequence number of a connect attempt.
pub type Epoch = u64;

/// Errors returned synchronously by [`Connection::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The connection is not open.
    #[error("not connected")]
    NotConnected,

    /// The outbound queue is full.
    #[error("outbound queue full")]
    Backpressure,
}

/// An opened connection handed to the session that drives it.
#[derive(Debug)]
pub struct Link {
    /// Epoch this link belongs to.
    pub epoch: Epoch,
    /// The established transport.
    pub transport: Transport,
    /// Frames queued by [`Connection::send`]. Ends when the connection is
    /// closed or fails.
    pub outbound_rx: mpsc::Receiver<Frame>,
}

#[derive(Debug, Default)]
struct Inner {
    state: ConnectionState,
    epoch: Epoch,
    outbound: Option<mpsc::Sender<Frame>>,
}

/// Lifecycle state and outbound queue of the feed socket.
#[derive(Debug, Default)]
pub struct Connection {
    inner: Mutex<Inner>,
}

impl Connection {
    /// Create an idle connection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Epoch of the most recent connect attempt.
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.inner.lock().epoch
    }

    /// Whether `epoch` is the open connection.
    #[must_use]
    pub fn is_current(&self, epoch: Epoch) -> bool {
        let inner = self.inner.lock();
        inner.epoch == epoch && inner.state == ConnectionState::Open
    }

    /// Open a new connection through `connector`.
    ///
    /// # Errors
    ///
    /// Returns the connector's error, [`ConnectError::Timeout`] if the attempt
    /// takes longer than `connect_timeout`, or [`ConnectError::Superseded`] if
    /// [`close`](Self::close) ran while the attempt was in flight.
    pub async fn open(
        &self,
        connector: &dyn Connector,
        endpoint: &str,
        connect_timeout: Duration,
        outbound_capacity: usize,
    ) -> Result<Link, ConnectError> {
        let epoch = {
            let mut inner = self.inner.lock();
            inner.epoch += 1;
            inner.state = ConnectionState::Connecting;
            inner.outbound = None;
            inner.epoch
        };

        let result = match tokio::time::timeout(connect_timeout, connector.connect(endpoint)).await
        {
            Ok(result) => result,
            Err(_) => Err(ConnectError::Timeout(connect_timeout)),
        };

        let mut inner = self.inner.lock();
        if inner.epoch != epoch || inner.state != ConnectionState::Connecting {
            return Err(ConnectError::Superseded);
        }

        match result {
            Ok(transport) => {
                let (tx, outbound_rx) = mpsc::channel(outbound_capacity.max(1));
                inner.state = ConnectionState::Open;
                inner.outbound = Some(tx);
                Ok(Link {
                    epoch,
                    transport,
                    outbound_rx,
                })
            }
            Err(e) => {
                inner.state = ConnectionState::Closed;
                Err(e)
            }
        }
    }

    /// Queue a frame for sending.
    ///
    /// Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotConnected`] unless the connection is
    /// open, and [`ConnectionError::Backpressure`] if the queue is full.
    pub fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
        let inner = self.inner.lock();
        let Some(outbound) = inner.outbound.as_ref().filter(|_| inner.state.is_open()) else {
            return Err(ConnectionError::NotConnected);
        };

        outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ConnectionError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => ConnectionError::NotConnected,
        })
    }

    /// Record a transport failure on `epoch`.
    ///
    /// Returns `true` only for the first failure of the open connection;
    /// failures of superseded or already-closed epochs return `false`.
    pub fn fail(&self, epoch: Epoch) -> bool {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch || inner.state != ConnectionState::Open {
            return false;
        }
        inner.state = ConnectionState::Closed;
        inner.outbound = None;
        true
    }

    /// Close the connection.
    ///
    /// A close frame is queued for an open connection before the queue is
    /// dropped. Idempotent; returns `true` if the connection was open.
    pub fn close(&self) -> bool {
        let mut inner = self.inner.lock();
        let was_open = inner.state == ConnectionState::Open;
        if inner.state == ConnectionState::Closed {
            return false;
        }

        inner.state = ConnectionState::Closing;
        if let Some(outbound) = inner.outbound.take() {
            let _ = outbound.try_send(Frame::Close);
        }
        inner.epoch += 1;
        inner.state = ConnectionState::Closed;
        was_open
    }
}
