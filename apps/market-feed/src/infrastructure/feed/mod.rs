//! Market Feed Adapter
//!
//! Streaming client for the market-data feed:
//!
//! - **Connection**: socket lifecycle, epochs and the bounded outbound queue
//! - **Codec**: JSON frames to typed messages and back
//! - **Heartbeat**: ping/pong liveness per session
//! - **Reconnect**: bounded exponential backoff
//! - **Client**: supervisor, subscriptions, dispatch and fallback

pub mod client;
pub mod codec;
pub mod connection;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;

pub use client::{FeedClient, FeedClientError, FeedStatus};
pub use codec::{CodecError, InboundMessage, JsonCodec};
pub use connection::{Connection, ConnectionError, Epoch, Link};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
pub use messages::{Acknowledgement, RequestMethod, SubscriptionRequest, TickerPayload};
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
