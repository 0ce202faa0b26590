//! Event Dispatcher
//!
//! Routes feed events to registered listener callbacks.
//!
//! # Channels
//!
//! - `connected`, `disconnected`, `error`: lifecycle events
//! - `message` (alias `*`): every topic update
//! - any other name: updates for that topic only
//!
//! A topic update reaches that topic's listeners first, then the `message`
//! listeners, each group in registration order.
//!
//! # Concurrency
//!
//! Dispatch works on a snapshot of the listener list taken under a read
//! lock that is released before any callback runs, so a callback may
//! register or remove listeners (including itself). Each snapshotted
//! listener is re-checked immediately before it is invoked.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::domain::streaming::{FeedEvent, Topic};

// =============================================================================
// Channels and Handles
// =============================================================================

/// A listener channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Connection opened.
    Connected,
    /// Connection closed.
    Disconnected,
    /// Failures.
    Error,
    /// Every topic update (wildcard).
    Message,
    /// Updates for one topic.
    Topic(Topic),
}

impl Channel {
    /// Parse a channel name.
    ///
    /// `*` and `message` both name the wildcard channel; names that are not
    /// a lifecycle channel are treated as topics.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "connected" => Self::Connected,
            "disconnected" => Self::Disconnected,
            "error" => Self::Error,
            "message" | "*" => Self::Message,
            topic => Self::Topic(Topic::new(topic)),
        }
    }

    /// Channel an event is primarily delivered on.
    #[must_use]
    pub fn of(event: &FeedEvent) -> Self {
        match event {
            FeedEvent::Connected => Self::Connected,
            FeedEvent::Disconnected => Self::Disconnected,
            FeedEvent::Error(_) => Self::Error,
            FeedEvent::TopicUpdate(update) => Self::Topic(update.topic.clone()),
        }
    }
}

impl From<&str> for Channel {
    fn from(name: &str) -> Self {
        Self::parse(name)
    }
}

impl From<Topic> for Channel {
    fn from(topic: Topic) -> Self {
        Self::Topic(topic)
    }
}

/// Handle returned on registration; pass it back to remove the listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    id: u64,
    channel: Channel,
}

impl ListenerHandle {
    /// Channel the listener is registered on.
    #[must_use]
    pub const fn channel(&self) -> &Channel {
        &self.channel
    }
}

/// Listener callback.
///
/// Returning `Err` (or panicking) is logged and does not affect other
/// listeners.
pub type Callback = Arc<dyn Fn(&FeedEvent) -> anyhow::Result<()> + Send + Sync>;

struct Listener {
    id: u64,
    active: AtomicBool,
    callback: Callback,
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Callbacks that returned `Ok`.
    pub delivered: usize,
    /// Callbacks that returned `Err` or panicked.
    pub failed: usize,
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Instance-owned listener registry.
pub struct Dispatcher {
    listeners: RwLock<HashMap<Channel, Vec<Arc<Listener>>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("listeners", &self.listener_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a callback on a channel.
    ///
    /// Registration after [`close`](Self::close) returns a handle whose
    /// callback never fires.
    pub fn register<F>(&self, channel: Channel, callback: F) -> ListenerHandle
    where
        F: Fn(&FeedEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register_arc(channel, Arc::new(callback))
    }

    /// Register a shared callback on a channel.
    pub fn register_arc(&self, channel: Channel, callback: Callback) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = ListenerHandle {
            id,
            channel: channel.clone(),
        };
        if self.is_closed() {
            return handle;
        }

        let listener = Arc::new(Listener {
            id,
            active: AtomicBool::new(true),
            callback,
        });
        self.listeners
            .write()
            .entry(channel)
            .or_default()
            .push(listener);
        handle
    }

    /// Remove a listener.
    ///
    /// Returns `false` if the handle was already removed.
    pub fn remove(&self, handle: &ListenerHandle) -> bool {
        let mut listeners = self.listeners.write();
        let Some(list) = listeners.get_mut(&handle.channel) else {
            return false;
        };
        let Some(index) = list.iter().position(|l| l.id == handle.id) else {
            return false;
        };

        let listener = list.remove(index);
        listener.active.store(false, Ordering::Release);
        if list.is_empty() {
            listeners.remove(&handle.channel);
        }
        true
    }

    /// Deliver an event to every interested listener.
    pub fn dispatch(&self, event: &FeedEvent) -> DispatchReport {
        if self.is_closed() {
            return DispatchReport::default();
        }

        let targets = self.snapshot(event);
        let mut report = DispatchReport::default();

        for listener in targets {
            if self.is_closed() {
                break;
            }
            if !listener.active.load(Ordering::Acquire) {
                continue;
            }

            match catch_unwind(AssertUnwindSafe(|| (listener.callback)(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    tracing::warn!(
                        listener = listener.id,
                        event = event.kind(),
                        error = %e,
                        "Listener failed"
                    );
                }
                Err(_) => {
                    report.failed += 1;
                    tracing::error!(
                        listener = listener.id,
                        event = event.kind(),
                        "Listener panicked"
                    );
                }
            }
        }

        report
    }

    /// Stop all delivery and drop every listener.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let drained: Vec<_> = self.listeners.write().drain().collect();
        for (_, list) in drained {
            for listener in list {
                listener.active.store(false, Ordering::Release);
            }
        }
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Total number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().values().map(Vec::len).sum()
    }

    fn snapshot(&self, event: &FeedEvent) -> Vec<Arc<Listener>> {
        let listeners = self.listeners.read();
        let primary = Channel::of(event);
        let mut targets: Vec<_> = listeners.get(&primary).cloned().unwrap_or_default();

        if matches!(event, FeedEvent::TopicUpdate(_))
            && let Some(wildcard) = listeners.get(&Channel::Message)
        {
            targets.extend(wildcard.iter().cloned());
        }
        targets
    }
}
