//! WebSocket Connector
//!
//! Production [`Connector`] backed by `tokio-tungstenite`. Converts between
//! WebSocket messages and transport frames; binary and raw frames are not
//! part of the feed protocol and are skipped.

use async_trait::async_trait;
use futures_util::future::ready;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::application::ports::{ConnectError, Connector, Frame, Transport, TransportError};

/// Connects to `ws://` and `wss://` endpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a new connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &str) -> Result<Transport, ConnectError> {
        tracing::debug!(endpoint, "Opening WebSocket");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(connect_error)?;
        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| TransportError::Io(e.to_string()))
            .with(|frame: Frame| ready(Ok::<_, TransportError>(to_message(frame))));

        let stream = read.filter_map(|item| {
            ready(match item {
                Ok(message) => from_message(message).map(Ok),
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                    Some(Err(TransportError::Closed))
                }
                Err(e) => Some(Err(TransportError::Io(e.to_string()))),
            })
        });

        Ok(Transport {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

fn connect_error(error: WsError) -> ConnectError {
    match error {
        WsError::Io(e) => ConnectError::Unreachable(e.to_string()),
        WsError::Url(e) => ConnectError::InvalidEndpoint(e.to_string()),
        WsError::HttpFormat(e) => ConnectError::InvalidEndpoint(e.to_string()),
        other => ConnectError::Handshake(other.to_string()),
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::text(text),
        Frame::Ping => Message::Ping(Vec::new().into()),
        Frame::Pong => Message::Pong(Vec::new().into()),
        Frame::Close => Message::Close(None),
    }
}

fn from_message(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        Message::Ping(_) => Some(Frame::Ping),
        Message::Pong(_) => Some(Frame::Pong),
        Message::Close(_) => Some(Frame::Close),
        Message::Binary(data) => {
            tracing::trace!(bytes = data.len(), "Skipping binary frame");
            None
        }
        Message::Frame(_) => None,
    }
}
