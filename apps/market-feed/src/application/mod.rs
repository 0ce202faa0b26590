//! Application Layer - Port definitions and event dispatch.
//!
//! This layer defines the transport contract the feed client drives and
//! the dispatcher that routes feed events to consumer callbacks.

/// Port interfaces for external systems (streaming transport).
pub mod ports;

/// Application services (listener dispatch).
pub mod services;
