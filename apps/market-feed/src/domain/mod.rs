//! Domain Layer - Core feed types and state machines.
//!
//! This layer holds the feed's data model and the bookkeeping that does not
//! touch I/O: topics and events, the quote snapshot, subscription tracking,
//! and the fallback state machine with its synthetic quote generator.

/// Topics, connection states and feed events.
pub mod streaming;

/// Quotes and the snapshot registry.
pub mod quote;

/// Desired and confirmed-active topic tracking.
pub mod subscription;

/// Fallback state machine and synthetic quote source.
pub mod fallback;
