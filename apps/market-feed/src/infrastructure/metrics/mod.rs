//! Prometheus Metrics Module
//!
//! Exposes feed metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Frames**: Inbound frames by kind, decode failures, stale frames
//! - **Connection**: Open/closed gauge and reconnect attempts
//! - **Fallback**: Degraded-mode gauge and activations by trigger
//! - **Listeners**: Callback failures and dispatch latency
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until a recorder is installed.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder.
///
/// Repeated calls return the handle installed by the first.
///
/// # Errors
///
/// Returns an error if another recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "market_feed_frames_received_total",
        "Inbound frames by decoded kind"
    );
    describe_counter!(
        "market_feed_decode_errors_total",
        "Inbound frames dropped as malformed"
    );
    describe_counter!(
        "market_feed_stale_frames_total",
        "Inbound frames dropped because their connection was superseded"
    );

    describe_gauge!(
        "market_feed_connected",
        "1 while the feed connection is open"
    );
    describe_counter!(
        "market_feed_reconnects_total",
        "Reconnection attempts scheduled"
    );
    describe_counter!(
        "market_feed_connection_errors_total",
        "Connection failures by kind"
    );

    describe_gauge!(
        "market_feed_degraded",
        "1 while fallback data is being served"
    );
    describe_counter!(
        "market_feed_fallback_activations_total",
        "Fallback activations by trigger"
    );

    describe_gauge!(
        "market_feed_subscriptions",
        "Desired topic subscriptions"
    );
    describe_counter!(
        "market_feed_listener_failures_total",
        "Listener callbacks that failed or panicked"
    );
    describe_histogram!(
        "market_feed_dispatch_seconds",
        "Time to deliver one event to all listeners"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for inbound frame kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Topic update.
    Update,
    /// Subscription acknowledgement.
    Ack,
    /// Server-reported error.
    ServerError,
    /// Keepalive traffic.
    Control,
}

impl FrameKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Ack => "ack",
            Self::ServerError => "server_error",
            Self::Control => "control",
        }
    }
}

/// Metric labels for fallback triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackTrigger {
    /// No live update before the deadline.
    Watchdog,
    /// Reconnection budget used up.
    Exhausted,
}

impl FallbackTrigger {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Watchdog => "watchdog",
            Self::Exhausted => "exhausted",
        }
    }
}

/// Record an inbound frame.
pub fn record_frame_received(kind: FrameKind) {
    counter!(
        "market_feed_frames_received_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a malformed inbound frame.
pub fn record_decode_error() {
    counter!("market_feed_decode_errors_total").increment(1);
}

/// Record a frame from a superseded connection.
pub fn record_stale_frame() {
    counter!("market_feed_stale_frames_total").increment(1);
}

/// Update the connection gauge.
pub fn set_connected(connected: bool) {
    gauge!("market_feed_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record a scheduled reconnection attempt.
pub fn record_reconnect() {
    counter!("market_feed_reconnects_total").increment(1);
}

/// Record a connection failure.
pub fn record_connection_error(kind: &'static str) {
    counter!(
        "market_feed_connection_errors_total",
        "kind" => kind
    )
    .increment(1);
}

/// Update the degraded-mode gauge.
pub fn set_degraded(degraded: bool) {
    gauge!("market_feed_degraded").set(if degraded { 1.0 } else { 0.0 });
}

/// Record a fallback activation.
pub fn record_fallback_activation(trigger: FallbackTrigger) {
    counter!(
        "market_feed_fallback_activations_total",
        "trigger" => trigger.as_str()
    )
    .increment(1);
}

/// Update the desired subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(count: usize) {
    gauge!("market_feed_subscriptions").set(count as f64);
}

/// Record failed listener callbacks.
pub fn record_listener_failures(count: usize) {
    counter!("market_feed_listener_failures_total").increment(count as u64);
}

/// Record how long one dispatch took.
pub fn record_dispatch_duration(event: &'static str, duration: Duration) {
    histogram!(
        "market_feed_dispatch_seconds",
        "event" => event
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
