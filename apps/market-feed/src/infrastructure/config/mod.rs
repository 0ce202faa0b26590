//! Configuration Module
//!
//! Configuration loading for the feed client and binary.

mod settings;

pub use settings::{ConfigError, FallbackSettings, FeedConfig, ServerSettings, WebSocketSettings};
