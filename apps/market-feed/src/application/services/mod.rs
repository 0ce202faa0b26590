//! Application Services
//!
//! - `Dispatcher`: routes feed events to listener callbacks by channel

/// Listener registry and event routing.
pub mod dispatch;

pub use dispatch::{Callback, Channel, DispatchReport, Dispatcher, ListenerHandle};
