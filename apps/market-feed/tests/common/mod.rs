//! Shared fixtures for feed client integration tests.
//!
//! `MockConnector` plays a scripted sequence of connect outcomes and hands
//! every accepted session to the test as a `MockSession`, which can push
//! inbound frames and read what the client sent.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as futures_mpsc;
use futures::{FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use market_feed::{
    ConnectError, Connector, FeedClient, FeedConfig, FeedEvent, Frame, Transport, TransportError,
    WebSocketSettings,
};

/// Outcome of one connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Accept,
    Refuse,
}

/// Connector that follows a script; refuses once the script runs out.
pub struct MockConnector {
    script: Mutex<VecDeque<Script>>,
    attempts: Mutex<Vec<Instant>>,
    sessions: mpsc::UnboundedSender<MockSession>,
}

impl MockConnector {
    pub fn new(
        script: impl IntoIterator<Item = Script>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<MockSession>) {
        let (sessions, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            attempts: Mutex::new(Vec::new()),
            sessions,
        });
        (connector, rx)
    }

    /// A connector that never accepts.
    pub fn refusing() -> Arc<Self> {
        Self::new([]).0
    }

    /// Queue more outcomes.
    pub fn extend(&self, script: impl IntoIterator<Item = Script>) {
        self.script.lock().extend(script);
    }

    /// Instants of every connect attempt so far.
    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _endpoint: &str) -> Result<Transport, ConnectError> {
        self.attempts.lock().push(Instant::now());
        let next = self.script.lock().pop_front().unwrap_or(Script::Refuse);

        match next {
            Script::Refuse => Err(ConnectError::Unreachable("connection refused".to_string())),
            Script::Accept => {
                let (out_tx, out_rx) = futures_mpsc::unbounded::<Frame>();
                let (in_tx, in_rx) = futures_mpsc::unbounded::<Result<Frame, TransportError>>();
                let _ = self.sessions.send(MockSession {
                    outbound: out_rx,
                    inbound: in_tx,
                });
                Ok(Transport {
                    sink: Box::pin(out_tx.sink_map_err(|e| TransportError::Io(e.to_string()))),
                    stream: Box::pin(in_rx),
                })
            }
        }
    }
}

/// The server side of one accepted connection.
pub struct MockSession {
    outbound: futures_mpsc::UnboundedReceiver<Frame>,
    inbound: futures_mpsc::UnboundedSender<Result<Frame, TransportError>>,
}

impl MockSession {
    /// Deliver a text frame to the client.
    pub fn push(&self, text: impl Into<String>) {
        self.inbound
            .unbounded_send(Ok(Frame::Text(text.into())))
            .unwrap();
    }

    /// Fail the transport with an I/O error.
    pub fn fail(&self, message: &str) {
        self.inbound
            .unbounded_send(Err(TransportError::Io(message.to_string())))
            .unwrap();
    }

    /// Next frame the client sent; `None` once the client dropped the socket.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.outbound.next().await
    }

    /// Next frame, parsed as JSON text.
    pub async fn next_json(&mut self) -> serde_json::Value {
        match self.next_frame().await {
            Some(Frame::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    /// A frame that is already queued, if any.
    pub fn queued_frame(&mut self) -> Option<Frame> {
        self.outbound.next().now_or_never().flatten()
    }
}

/// Defaults used across tests: no heartbeat, 1s base backoff doubling to
/// 30s, five retries, 3s fallback timeout.
pub fn test_config() -> FeedConfig {
    FeedConfig::new("ws://feed.test/ws").with_websocket(WebSocketSettings {
        heartbeat_interval: None,
        outbound_capacity: 64,
        ..WebSocketSettings::default()
    })
}

/// A ticker update for `symbol`.
pub fn ticker(symbol: &str, price: &str) -> String {
    format!(
        r#"{{"method":"ticker.{symbol}","params":{{"price":"{price}","high":"44000","low":"42000","volume":"1200","changePercent":"1.25"}}}}"#
    )
}

/// Let every ready task run until the runtime is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Record every event the client delivers as a short label.
pub fn record_events(client: &FeedClient) -> Arc<Mutex<Vec<String>>> {
    let log = Arc::new(Mutex::new(Vec::new()));

    for channel in ["connected", "disconnected", "error", "*"] {
        let log = Arc::clone(&log);
        client.on(channel, move |event| {
            let label = match event {
                FeedEvent::Connected => "connected".to_string(),
                FeedEvent::Disconnected => "disconnected".to_string(),
                FeedEvent::Error(fault) => format!("error:{fault}"),
                FeedEvent::TopicUpdate(update) => format!("message:{}", update.topic),
            };
            log.lock().push(label);
            Ok(())
        });
    }

    log
}
