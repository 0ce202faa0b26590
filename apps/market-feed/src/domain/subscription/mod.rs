//! Subscription Tracking
//!
//! Tracks which topics the consumer wants (the desired set) and which of
//! them have been sent on the current connection (the active set).
//!
//! # Design
//!
//! The registry tracks:
//! - Desired topics, in the order they were first requested
//! - Active topics for the current connection
//! - Request ids awaiting acknowledgement
//!
//! Sending is fire-and-forget: a topic becomes active the moment a caller
//! claims it for sending. Claiming is atomic, so two callers racing to send
//! the same topic produce one frame. Every close clears the active set and
//! the pending ids, which makes acknowledgements from an older connection
//! unmatchable.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::streaming::Topic;

// =============================================================================
// Types
// =============================================================================

/// Request id correlating a subscribe frame with its acknowledgement.
pub type RequestId = u64;

/// A topic claimed for sending, with the request id to put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Topic to subscribe.
    pub topic: Topic,
    /// Fresh request id.
    pub request_id: RequestId,
}

/// Result of removing a topic from the desired set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Unsubscribed {
    /// The topic was in the desired set.
    pub was_desired: bool,
    /// The topic had been sent on the current connection.
    pub was_active: bool,
}

/// Registry counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Topics the consumer wants.
    pub desired: usize,
    /// Topics sent on the current connection.
    pub active: usize,
    /// Requests not yet acknowledged.
    pub pending: usize,
}

#[derive(Debug, Default)]
struct RegistryState {
    desired: Vec<Topic>,
    active: HashSet<Topic>,
    pending: HashMap<RequestId, Topic>,
}

impl RegistryState {
    fn is_desired(&self, topic: &Topic) -> bool {
        self.desired.contains(topic)
    }

    fn claim(&mut self, topic: &Topic, request_id: RequestId) -> Subscription {
        self.active.insert(topic.clone());
        self.pending.insert(request_id, topic.clone());
        Subscription {
            topic: topic.clone(),
            request_id,
        }
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe registry of desired and active topics.
///
/// # Example
///
/// ```rust
/// use market_feed::domain::streaming::Topic;
/// use market_feed::domain::subscription::SubscriptionRegistry;
///
/// let registry = SubscriptionRegistry::new();
/// let topic = Topic::from("ticker.BTCUSDT");
///
/// // Desired while disconnected; nothing to send yet
/// assert!(registry.subscribe(topic.clone()));
/// assert!(!registry.subscribe(topic.clone()));
///
/// // On open, every desired topic is claimed exactly once
/// let replay = registry.claim_all();
/// assert_eq!(replay.len(), 1);
/// assert!(registry.claim_all().is_empty());
///
/// // Connection lost: the next open replays again
/// registry.reset_active();
/// assert_eq!(registry.claim_all().len(), 1);
/// ```
#[derive(Debug)]
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
    next_id: AtomicU64,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a registry with an initial desired set.
    #[must_use]
    pub fn with_topics(topics: impl IntoIterator<Item = Topic>) -> Self {
        let registry = Self::new();
        for topic in topics {
            registry.subscribe(topic);
        }
        registry
    }

    /// Allocate a fresh request id.
    pub fn next_request_id(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Add a topic to the desired set.
    ///
    /// Returns `false` if it was already desired.
    pub fn subscribe(&self, topic: Topic) -> bool {
        let mut state = self.state.write();
        if state.is_desired(&topic) {
            return false;
        }
        state.desired.push(topic);
        true
    }

    /// Remove a topic from the desired and active sets.
    pub fn unsubscribe(&self, topic: &Topic) -> Unsubscribed {
        let mut state = self.state.write();
        let before = state.desired.len();
        state.desired.retain(|t| t != topic);
        let was_desired = state.desired.len() != before;
        let was_active = state.active.remove(topic);
        state.pending.retain(|_, t| t != topic);

        Unsubscribed {
            was_desired,
            was_active,
        }
    }

    /// Claim one desired topic for sending on the current connection.
    ///
    /// Returns `None` if the topic is not desired or already active.
    pub fn claim(&self, topic: &Topic) -> Option<Subscription> {
        let mut state = self.state.write();
        if !state.is_desired(topic) || state.active.contains(topic) {
            return None;
        }
        let request_id = self.next_request_id();
        Some(state.claim(topic, request_id))
    }

    /// Claim every desired topic not yet active, in desired order.
    pub fn claim_all(&self) -> Vec<Subscription> {
        let mut state = self.state.write();
        let unclaimed: Vec<_> = state
            .desired
            .iter()
            .filter(|t| !state.active.contains(*t))
            .cloned()
            .collect();

        unclaimed
            .iter()
            .map(|topic| {
                let request_id = self.next_request_id();
                state.claim(topic, request_id)
            })
            .collect()
    }

    /// Undo a claim whose frame could not be sent.
    pub fn release(&self, subscription: &Subscription) {
        let mut state = self.state.write();
        if state.pending.remove(&subscription.request_id).is_some() {
            state.active.remove(&subscription.topic);
        }
    }

    /// Forget everything tied to the current connection.
    pub fn reset_active(&self) {
        let mut state = self.state.write();
        state.active.clear();
        state.pending.clear();
    }

    /// Match an acknowledgement against pending requests.
    ///
    /// Returns the topic the request was for, or `None` for ids that are
    /// unknown or belong to an earlier connection.
    pub fn acknowledge(&self, request_id: RequestId) -> Option<Topic> {
        self.state.write().pending.remove(&request_id)
    }

    /// Desired topics in request order.
    #[must_use]
    pub fn desired(&self) -> Vec<Topic> {
        self.state.read().desired.clone()
    }

    /// Active topics, sorted.
    #[must_use]
    pub fn active(&self) -> Vec<Topic> {
        let mut active: Vec<_> = self.state.read().active.iter().cloned().collect();
        active.sort();
        active
    }

    /// Whether a topic is desired.
    #[must_use]
    pub fn is_desired(&self, topic: &Topic) -> bool {
        self.state.read().is_desired(topic)
    }

    /// Whether a topic has been sent on the current connection.
    #[must_use]
    pub fn is_active(&self, topic: &Topic) -> bool {
        self.state.read().active.contains(topic)
    }

    /// Registry counts.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let state = self.state.read();
        SubscriptionStats {
            desired: state.desired.len(),
            active: state.active.len(),
            pending: state.pending.len(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
