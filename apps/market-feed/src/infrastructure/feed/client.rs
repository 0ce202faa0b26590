//! Feed Client
//!
//! Ties the connection, reconnect policy, subscription registry, dispatcher
//! and fallback source into one client.
//!
//! # Tasks
//!
//! - **Supervisor**: opens the connection, replays subscriptions, drives the
//!   session loop (inbound frames, outbound queue, heartbeat) and sleeps
//!   through reconnect backoff. Listener callbacks run on this task.
//! - **Watchdog**: started whenever the fallback is armed; activates the
//!   fallback snapshot if no live update arrives before the deadline.
//!
//! [`FeedClient::shutdown`], which also runs when the client is dropped,
//! aborts the watchdog and cancels the supervisor. An open session gets a
//! short grace period to write the close frame before the socket is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, InboundMessage, JsonCodec};
use super::connection::{Connection, ConnectionError, Epoch, Link};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::messages::SubscriptionRequest;
use super::reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
use crate::application::ports::{
    ConnectError, Connector, Frame, FrameSink, Transport, TransportError,
};
use crate::application::services::{Channel, Dispatcher, ListenerHandle};
use crate::domain::fallback::{FallbackController, FallbackSource, FallbackState};
use crate::domain::quote::{Quote, QuoteBook};
use crate::domain::streaming::{
    ConnectionState, FeedEvent, FeedFault, QuotePayload, Symbol, Topic, TopicUpdate,
};
use crate::domain::subscription::{Subscription, SubscriptionRegistry};
use crate::infrastructure::config::FeedConfig;
use crate::infrastructure::metrics::{self, FallbackTrigger, FrameKind};
use crate::infrastructure::websocket::WebSocketConnector;

// =============================================================================
// Error Type
// =============================================================================

/// Errors returned by the public client API.
#[derive(Debug, thiserror::Error)]
pub enum FeedClientError {
    /// The client has been shut down.
    #[error("feed client is shut down")]
    Shutdown,

    /// The client was created outside a Tokio runtime.
    #[error("no Tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// The frame could not be queued.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// The request could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

// =============================================================================
// Status
// =============================================================================

/// Point-in-time view of the client, served by the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedStatus {
    /// Connection lifecycle state.
    pub connection: ConnectionState,
    /// Whether live data is being served.
    pub live: bool,
    /// Fallback state machine.
    pub fallback: FallbackState,
    /// Reconnection gave up; waiting for a manual reconnect.
    pub exhausted: bool,
    /// The client has been shut down.
    pub shut_down: bool,
    /// Retries since the last successful open.
    pub reconnect_attempts: u32,
    /// Topics the consumer wants.
    pub desired_topics: usize,
    /// Topics sent on the current connection.
    pub active_topics: usize,
    /// Symbols in the snapshot.
    pub quotes: usize,
    /// Symbols whose record came from the fallback source.
    pub fallback_quotes: usize,
    /// Registered listeners.
    pub listeners: usize,
}

// =============================================================================
// Shared State
// =============================================================================

/// How long shutdown lets the session flush queued frames and the close
/// frame before the socket is dropped.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

#[derive(Default)]
struct Tasks {
    supervisor: Option<JoinHandle<()>>,
    watchdog: Option<(CancellationToken, JoinHandle<()>)>,
}

/// How a session ended.
enum SessionEnd {
    /// Shutdown, or the connection was closed locally.
    Stopped,
    /// The transport failed.
    Failed(FeedFault),
}

struct FeedShared {
    config: FeedConfig,
    connector: Arc<dyn Connector>,
    runtime: Handle,
    connection: Connection,
    registry: SubscriptionRegistry,
    dispatcher: Dispatcher,
    quotes: QuoteBook,
    fallback: FallbackController,
    source: FallbackSource,
    codec: JsonCodec,
    cancel: CancellationToken,
    shut_down: AtomicBool,
    exhausted: AtomicBool,
    attempts: AtomicU32,
    tasks: Mutex<Tasks>,
    /// Serializes fallback activation against live writes to the snapshot.
    snapshot_guard: Mutex<()>,
    /// Serializes claim-and-send of one topic against the replay on open.
    subscription_guard: Mutex<()>,
}

impl FeedShared {
    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Supervisor
    // -------------------------------------------------------------------------

    async fn supervise(self: Arc<Self>) {
        let mut policy =
            ReconnectPolicy::new(ReconnectConfig::from_websocket_settings(&self.config.websocket));

        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            tracing::info!(endpoint = %self.config.endpoint, "Connecting to market feed");
            let settings = &self.config.websocket;
            let opened = tokio::select! {
                () = self.cancel.cancelled() => return,
                result = self.connection.open(
                    self.connector.as_ref(),
                    &self.config.endpoint,
                    settings.connect_timeout,
                    settings.outbound_capacity,
                ) => result,
            };

            let fault = match opened {
                Ok(link) => {
                    policy.reset();
                    self.attempts.store(0, Ordering::SeqCst);
                    let epoch = link.epoch;
                    self.on_open();

                    match self.run_session(link).await {
                        SessionEnd::Stopped => return,
                        SessionEnd::Failed(fault) => {
                            if !self.connection.fail(epoch) {
                                return;
                            }
                            fault
                        }
                    }
                }
                Err(ConnectError::Superseded) => return,
                Err(e) => {
                    tracing::warn!(error = %e, kind = e.kind(), "Market feed connect failed");
                    metrics::record_connection_error(e.kind());
                    FeedFault::Connect(e.to_string())
                }
            };

            if self.is_shut_down() {
                return;
            }
            self.on_unexpected_close(fault);

            match policy.next_delay() {
                Ok(delay) => {
                    let attempt = policy.attempt_count();
                    self.attempts.store(attempt, Ordering::SeqCst);
                    metrics::record_reconnect();
                    tracing::info!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Reconnecting to market feed"
                    );

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::debug!("Reconnect cancelled");
                            return;
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(ReconnectError::Exhausted { attempts }) => {
                    self.on_exhausted(attempts);
                    return;
                }
            }
        }
    }

    fn on_open(&self) {
        tracing::info!("Market feed connected");
        metrics::set_connected(true);
        self.replay_subscriptions();
        self.emit(&FeedEvent::Connected);
    }

    fn replay_subscriptions(&self) {
        let _guard = self.subscription_guard.lock();
        let subscriptions = self.registry.claim_all();
        let mut sent = 0usize;
        for subscription in &subscriptions {
            match self.send_subscription(subscription) {
                Ok(()) => sent += 1,
                Err(e) => tracing::warn!(
                    topic = %subscription.topic,
                    error = %e,
                    "Failed to replay subscription"
                ),
            }
        }
        if sent > 0 {
            tracing::debug!(count = sent, "Replayed subscriptions");
        }
    }

    async fn run_session(&self, link: Link) -> SessionEnd {
        let Link {
            epoch,
            transport,
            mut outbound_rx,
        } = link;
        let Transport {
            mut sink,
            mut stream,
        } = transport;

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let heartbeat_cancel = self.cancel.child_token();
        let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
        let mut heartbeat_rx = HeartbeatConfig::from_websocket_settings(&self.config.websocket)
            .map(|config| {
                let (tx, rx) = mpsc::channel(4);
                tokio::spawn(
                    HeartbeatManager::new(
                        config,
                        Arc::clone(&heartbeat_state),
                        tx,
                        heartbeat_cancel.clone(),
                    )
                    .run(),
                );
                rx
            });

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    flush_on_shutdown(&mut outbound_rx, &mut sink).await;
                    return SessionEnd::Stopped;
                }
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else {
                        return SessionEnd::Stopped;
                    };
                    let closing = frame == Frame::Close;
                    if let Err(e) = sink.send(frame).await {
                        return SessionEnd::Failed(transport_fault(e));
                    }
                    if closing {
                        return SessionEnd::Stopped;
                    }
                }
                event = next_heartbeat(&mut heartbeat_rx) => match event {
                    HeartbeatEvent::SendPing => {
                        heartbeat_state.mark_ping_sent();
                        if let Err(e) = sink.send(Frame::Ping).await {
                            return SessionEnd::Failed(transport_fault(e));
                        }
                    }
                    HeartbeatEvent::Timeout => {
                        tracing::warn!("Market feed heartbeat timed out");
                        return SessionEnd::Failed(FeedFault::HeartbeatTimeout);
                    }
                },
                inbound = stream.next() => match inbound {
                    Some(Ok(Frame::Text(text))) => {
                        heartbeat_state.record_pong();
                        self.handle_text(epoch, &text);
                    }
                    Some(Ok(Frame::Pong)) => {
                        metrics::record_frame_received(FrameKind::Control);
                        heartbeat_state.record_pong();
                    }
                    Some(Ok(Frame::Ping)) => {
                        metrics::record_frame_received(FrameKind::Control);
                        if let Err(e) = sink.send(Frame::Pong).await {
                            return SessionEnd::Failed(transport_fault(e));
                        }
                    }
                    Some(Ok(Frame::Close)) | None => {
                        tracing::info!("Market feed closed by peer");
                        return SessionEnd::Failed(FeedFault::ClosedByPeer);
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Market feed transport error");
                        return SessionEnd::Failed(transport_fault(e));
                    }
                },
            }
        }
    }

    fn on_unexpected_close(self: &Arc<Self>, fault: FeedFault) {
        self.registry.reset_active();
        metrics::set_connected(false);
        self.emit(&FeedEvent::Error(fault));
        self.emit(&FeedEvent::Disconnected);
        self.arm_watchdog();
    }

    fn on_exhausted(&self, attempts: u32) {
        self.exhausted.store(true, Ordering::SeqCst);
        self.cancel_watchdog();
        tracing::error!(attempts, "Market feed reconnect attempts exhausted");
        self.activate_fallback(FallbackTrigger::Exhausted);
        self.emit(&FeedEvent::Error(FeedFault::ReconnectExhausted { attempts }));
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    fn handle_text(&self, epoch: Epoch, text: &str) {
        if !self.connection.is_current(epoch) {
            metrics::record_stale_frame();
            tracing::trace!(epoch, "Dropping frame from superseded connection");
            return;
        }

        match self.codec.decode(text) {
            Err(e) => {
                metrics::record_decode_error();
                tracing::warn!(error = %e, "Dropping malformed frame");
            }
            Ok(InboundMessage::Ack(ack)) => {
                metrics::record_frame_received(FrameKind::Ack);
                match (self.registry.acknowledge(ack.id), ack.error) {
                    (Some(topic), None) => {
                        tracing::debug!(%topic, request_id = ack.id, "Subscription acknowledged");
                    }
                    (Some(topic), Some(error)) => {
                        tracing::warn!(%topic, request_id = ack.id, %error, "Subscription rejected");
                    }
                    (None, _) => {
                        tracing::debug!(request_id = ack.id, "Ignoring unmatched acknowledgement");
                    }
                }
            }
            Ok(InboundMessage::ServerError(message)) => {
                metrics::record_frame_received(FrameKind::ServerError);
                tracing::warn!(error = %message, "Market feed reported an error");
                self.emit(&FeedEvent::Error(FeedFault::Server(message)));
            }
            Ok(InboundMessage::Update(update)) => {
                metrics::record_frame_received(FrameKind::Update);
                self.apply_update(&update);
                self.emit(&FeedEvent::TopicUpdate(update));
            }
        }
    }

    fn apply_update(&self, update: &TopicUpdate) {
        let _guard = self.snapshot_guard.lock();
        match &update.quotes {
            QuotePayload::Single(quote) => {
                self.quotes.apply_live(quote.clone());
            }
            QuotePayload::Overview(quotes) => self.quotes.apply_live_overview(quotes.clone()),
            // Depth, trades and heartbeats leave the snapshot untouched and
            // do not count as live data.
            QuotePayload::None => return,
        }

        if let Some(previous) = self.fallback.on_live_update() {
            self.cancel_watchdog();
            if previous == FallbackState::Active {
                metrics::set_degraded(false);
                tracing::info!(topic = %update.topic, "Live market data restored");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Fallback
    // -------------------------------------------------------------------------

    fn arm_watchdog(self: &Arc<Self>) {
        if self.is_shut_down() || !self.fallback.arm() {
            return;
        }

        let token = self.cancel.child_token();
        let timeout = self.config.fallback.timeout;
        let handle = self.runtime.spawn({
            let shared = Arc::clone(self);
            let token = token.clone();
            async move {
                tokio::select! {
                    () = token.cancelled() => {}
                    () = tokio::time::sleep(timeout) => {
                        shared.activate_fallback(FallbackTrigger::Watchdog);
                    }
                }
            }
        });

        tracing::debug!(
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "Fallback watchdog armed"
        );
        if let Some((previous, handle)) = self.tasks.lock().watchdog.replace((token, handle)) {
            previous.cancel();
            handle.abort();
        }
    }

    fn cancel_watchdog(&self) {
        if let Some((token, _handle)) = self.tasks.lock().watchdog.take() {
            token.cancel();
        }
    }

    fn activate_fallback(&self, trigger: FallbackTrigger) {
        let _guard = self.snapshot_guard.lock();
        if self.is_shut_down() {
            return;
        }

        let activated = match trigger {
            FallbackTrigger::Watchdog => self.fallback.on_watchdog_elapsed(),
            FallbackTrigger::Exhausted => self.fallback.force_active(),
        };
        if !activated {
            return;
        }

        let symbols = self.fallback_symbols();
        self.quotes.install_fallback(self.source.generate(&symbols));
        metrics::set_degraded(true);
        metrics::record_fallback_activation(trigger);
        tracing::warn!(
            trigger = trigger.as_str(),
            symbols = symbols.len(),
            "Serving fallback market data"
        );
    }

    /// Configured fallback symbols followed by symbols named by desired
    /// topics, without duplicates.
    fn fallback_symbols(&self) -> Vec<Symbol> {
        let mut symbols = self.config.fallback.symbols.clone();
        for topic in self.registry.desired() {
            if let Some(symbol) = topic.symbol()
                && !symbols.contains(&symbol)
            {
                symbols.push(symbol);
            }
        }
        symbols
    }

    // -------------------------------------------------------------------------
    // Outbound
    // -------------------------------------------------------------------------

    fn send_request(&self, request: &SubscriptionRequest) -> Result<(), FeedClientError> {
        let text = self.codec.encode_request(request)?;
        self.connection.send(Frame::Text(text))?;
        Ok(())
    }

    fn send_subscription(&self, subscription: &Subscription) -> Result<(), FeedClientError> {
        let request =
            SubscriptionRequest::subscribe(subscription.topic.clone(), subscription.request_id);
        self.send_request(&request)
            .inspect_err(|_| self.registry.release(subscription))
    }

    fn emit(&self, event: &FeedEvent) {
        let started = Instant::now();
        let report = self.dispatcher.dispatch(event);
        if report.failed > 0 {
            metrics::record_listener_failures(report.failed);
        }
        metrics::record_dispatch_duration(event.kind(), started.elapsed());
    }

    // -------------------------------------------------------------------------
    // Shutdown
    // -------------------------------------------------------------------------

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.cancel.cancel();
        let (supervisor, watchdog) = {
            let mut tasks = self.tasks.lock();
            (tasks.supervisor.take(), tasks.watchdog.take())
        };
        if let Some((token, handle)) = watchdog {
            token.cancel();
            handle.abort();
        }
        // The supervisor stops on its own once cancelled; an open session
        // first flushes the close frame queued below.
        drop(supervisor);

        if self.connection.close() {
            metrics::set_connected(false);
            self.emit(&FeedEvent::Disconnected);
        }

        {
            let _guard = self.snapshot_guard.lock();
            self.fallback.disarm();
        }
        metrics::set_degraded(false);
        self.dispatcher.close();
        tracing::info!("Market feed client shut down");
    }
}

/// Write what is still queued, ending with the close frame, within
/// [`CLOSE_GRACE`]. The queue ends once the connection has been closed.
async fn flush_on_shutdown(outbound_rx: &mut mpsc::Receiver<Frame>, sink: &mut FrameSink) {
    let flush = async {
        while let Some(frame) = outbound_rx.recv().await {
            let closing = frame == Frame::Close;
            if sink.send(frame).await.is_err() || closing {
                break;
            }
        }
    };
    if tokio::time::timeout(CLOSE_GRACE, flush).await.is_err() {
        tracing::debug!("Close frame not flushed before shutdown grace elapsed");
    }
}

fn transport_fault(error: TransportError) -> FeedFault {
    match error {
        TransportError::Closed => FeedFault::ClosedByPeer,
        TransportError::Io(message) => FeedFault::Transport(message),
    }
}

/// Next heartbeat event, or never when heartbeats are disabled or stopped.
async fn next_heartbeat(rx: &mut Option<mpsc::Receiver<HeartbeatEvent>>) -> HeartbeatEvent {
    if let Some(rx) = rx
        && let Some(event) = rx.recv().await
    {
        return event;
    }
    std::future::pending().await
}

// =============================================================================
// Feed Client
// =============================================================================

/// Real-time market data client.
///
/// Keeps one streaming connection open, re-subscribes desired topics after
/// every reconnect, delivers updates to listeners and serves a synthetic
/// snapshot while live data is unavailable.
///
/// # Example
///
/// ```no_run
/// use market_feed::{FeedClient, FeedConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = FeedConfig::new("wss://feed.example.com/ws")
///     .with_topics(["ticker.BTCUSDT", "market.overview"]);
/// let client = FeedClient::connect(config)?;
///
/// client.on_update("*", |update| {
///     tracing::info!(topic = %update.topic, "update");
///     Ok(())
/// });
///
/// if let Some(quote) = client.snapshot("BTCUSDT") {
///     println!("{} {}", quote.symbol, quote.price);
/// }
/// client.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct FeedClient {
    shared: Arc<FeedShared>,
}

impl std::fmt::Debug for FeedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedClient")
            .field("endpoint", &self.shared.config.endpoint)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl FeedClient {
    /// Create an idle client.
    ///
    /// Register listeners, then call [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`FeedClientError::NoRuntime`] when called outside a Tokio
    /// runtime.
    pub fn new(config: FeedConfig, connector: Arc<dyn Connector>) -> Result<Self, FeedClientError> {
        let runtime = Handle::try_current()?;
        let registry = SubscriptionRegistry::with_topics(config.initial_topics.iter().cloned());
        metrics::set_subscriptions(registry.stats().desired);

        Ok(Self {
            shared: Arc::new(FeedShared {
                config,
                connector,
                runtime,
                connection: Connection::new(),
                registry,
                dispatcher: Dispatcher::new(),
                quotes: QuoteBook::new(),
                fallback: FallbackController::new(),
                source: FallbackSource::new(),
                codec: JsonCodec::new(),
                cancel: CancellationToken::new(),
                shut_down: AtomicBool::new(false),
                exhausted: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
                tasks: Mutex::new(Tasks::default()),
                snapshot_guard: Mutex::new(()),
                subscription_guard: Mutex::new(()),
            }),
        })
    }

    /// Create a client over WebSocket and start it.
    ///
    /// # Errors
    ///
    /// Returns [`FeedClientError::NoRuntime`] when called outside a Tokio
    /// runtime.
    pub fn connect(config: FeedConfig) -> Result<Self, FeedClientError> {
        let client = Self::new(config, Arc::new(WebSocketConnector::new()))?;
        client.start()?;
        Ok(client)
    }

    /// Arm the fallback watchdog and start the supervisor.
    ///
    /// Calling `start` on a running client does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`FeedClientError::Shutdown`] after shutdown.
    pub fn start(&self) -> Result<(), FeedClientError> {
        self.ensure_running()?;
        {
            let mut tasks = self.shared.tasks.lock();
            if tasks.supervisor.is_some() {
                return Ok(());
            }
            tasks.supervisor = Some(
                self.shared
                    .runtime
                    .spawn(Arc::clone(&self.shared).supervise()),
            );
        }

        self.shared.arm_watchdog();
        Ok(())
    }

    /// Restart reconnection after the attempt budget was used up.
    ///
    /// Does nothing while the supervisor is still connecting or connected.
    ///
    /// # Errors
    ///
    /// Returns [`FeedClientError::Shutdown`] after shutdown.
    pub fn reconnect(&self) -> Result<(), FeedClientError> {
        self.ensure_running()?;

        let mut tasks = self.shared.tasks.lock();
        let running = tasks.supervisor.as_ref().is_some_and(|h| !h.is_finished());
        let exhausted = self
            .shared
            .exhausted
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if running && !exhausted {
            return Ok(());
        }

        tracing::info!("Manual reconnect requested");
        self.shared.attempts.store(0, Ordering::SeqCst);
        tasks.supervisor = Some(
            self.shared
                .runtime
                .spawn(Arc::clone(&self.shared).supervise()),
        );
        Ok(())
    }

    /// Stop the client.
    ///
    /// Cancels the watchdog and any pending reconnect, closes the socket,
    /// emits a final `disconnected` if the connection was open and then
    /// seals the dispatcher. Idempotent; never activates the fallback.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    fn ensure_running(&self) -> Result<(), FeedClientError> {
        if self.shared.is_shut_down() {
            return Err(FeedClientError::Shutdown);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Snapshot
    // -------------------------------------------------------------------------

    /// Latest quote for `symbol`.
    #[must_use]
    pub fn snapshot(&self, symbol: &str) -> Option<Quote> {
        self.shared.quotes.get(&symbol.to_uppercase())
    }

    /// Every quote, ordered by symbol.
    #[must_use]
    pub fn snapshot_all(&self) -> Vec<Quote> {
        self.shared.quotes.all()
    }

    /// `false` while fallback data is being served.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.shared.fallback.is_live()
    }

    // -------------------------------------------------------------------------
    // Listeners
    // -------------------------------------------------------------------------

    /// Register a listener on a channel.
    ///
    /// Channel names: `connected`, `disconnected`, `error`, `message` (or
    /// `*`) for every update, or a topic name.
    pub fn on<F>(&self, channel: impl Into<Channel>, callback: F) -> ListenerHandle
    where
        F: Fn(&FeedEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.dispatcher.register(channel.into(), callback)
    }

    /// Register a listener for updates on one topic, or on every topic
    /// with `*`.
    pub fn on_update<F>(&self, topic: &str, callback: F) -> ListenerHandle
    where
        F: Fn(&TopicUpdate) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let channel = match topic {
            "*" | "message" => Channel::Message,
            topic => Channel::Topic(Topic::new(topic)),
        };
        self.shared
            .dispatcher
            .register(channel, move |event| match event {
                FeedEvent::TopicUpdate(update) => callback(update),
                _ => Ok(()),
            })
    }

    /// Remove a listener. Returns `false` if it was already removed.
    pub fn remove_listener(&self, handle: &ListenerHandle) -> bool {
        self.shared.dispatcher.remove(handle)
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Add a topic to the desired set.
    ///
    /// Sent immediately when connected, otherwise on the next open.
    /// Subscribing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`FeedClientError::Shutdown`] after shutdown, or
    /// [`ConnectionError::Backpressure`] if the frame could not be queued.
    /// The topic stays desired either way and is replayed on reconnect.
    pub fn subscribe(&self, topic: impl Into<Topic>) -> Result<(), FeedClientError> {
        self.ensure_running()?;
        let topic = topic.into();
        let shared = &self.shared;

        if shared.registry.subscribe(topic.clone()) {
            metrics::set_subscriptions(shared.registry.stats().desired);
            tracing::debug!(%topic, "Topic subscribed");
        }

        let _guard = shared.subscription_guard.lock();
        let Some(subscription) = shared.registry.claim(&topic) else {
            return Ok(());
        };
        match shared.send_subscription(&subscription) {
            Err(FeedClientError::Connection(ConnectionError::NotConnected)) => Ok(()),
            result => result,
        }
    }

    /// Remove a topic from the desired set, sending an unsubscribe frame if
    /// it was active on the current connection.
    ///
    /// # Errors
    ///
    /// Returns [`FeedClientError::Shutdown`] after shutdown, or
    /// [`ConnectionError::Backpressure`] if the frame could not be queued.
    pub fn unsubscribe(&self, topic: impl Into<Topic>) -> Result<(), FeedClientError> {
        self.ensure_running()?;
        let topic = topic.into();
        let shared = &self.shared;

        let removed = shared.registry.unsubscribe(&topic);
        if removed.was_desired {
            metrics::set_subscriptions(shared.registry.stats().desired);
            tracing::debug!(%topic, "Topic unsubscribed");
        }
        if !removed.was_active {
            return Ok(());
        }

        let request = SubscriptionRequest::unsubscribe(topic, shared.registry.next_request_id());
        match shared.send_request(&request) {
            Err(FeedClientError::Connection(ConnectionError::NotConnected)) => Ok(()),
            result => result,
        }
    }

    /// Queue a raw text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotConnected`] unless the connection is
    /// open, or [`ConnectionError::Backpressure`] if the queue is full.
    pub fn send(&self, text: impl Into<String>) -> Result<(), ConnectionError> {
        self.shared.connection.send(Frame::Text(text.into()))
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Connection lifecycle state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection.state()
    }

    /// Retries since the last successful open.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Desired topics in request order.
    #[must_use]
    pub fn topics(&self) -> Vec<Topic> {
        self.shared.registry.desired()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> FeedStatus {
        let shared = &self.shared;
        let subscriptions = shared.registry.stats();
        let quotes = shared.quotes.stats();
        let fallback = shared.fallback.state();

        FeedStatus {
            connection: shared.connection.state(),
            live: fallback != FallbackState::Active,
            fallback,
            exhausted: shared.exhausted.load(Ordering::SeqCst),
            shut_down: shared.is_shut_down(),
            reconnect_attempts: shared.attempts.load(Ordering::SeqCst),
            desired_topics: subscriptions.desired,
            active_topics: subscriptions.active,
            quotes: quotes.live + quotes.fallback,
            fallback_quotes: quotes.fallback,
            listeners: shared.dispatcher.listener_count(),
        }
    }
}

impl Drop for FeedClient {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}
