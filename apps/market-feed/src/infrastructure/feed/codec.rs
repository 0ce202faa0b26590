//! Feed Codec
//!
//! Decodes inbound JSON text frames into typed messages and encodes
//! outbound subscription requests.
//!
//! # Classification
//!
//! An inbound object is, in order of precedence:
//! - a topic update, if it has a string `method`
//! - an acknowledgement, if it has an `id` (number or numeric string)
//! - a server error, if it has an `error`
//!
//! Anything else is rejected with a [`CodecError`]. Rejected frames are
//! logged and dropped by the caller; they never affect the connection.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::messages::{Acknowledgement, SubscriptionRequest, TickerPayload};
use crate::domain::quote::{Quote, QuoteOrigin};
use crate::domain::streaming::{QuotePayload, Topic, TopicUpdate};
use crate::domain::subscription::RequestId;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame is not valid JSON.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is JSON but not an object.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    /// Object matches no known message shape.
    #[error("unrecognized message: {0}")]
    Unrecognized(String),
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Subscription acknowledgement.
    Ack(Acknowledgement),
    /// Topic update.
    Update(TopicUpdate),
    /// Server-reported error not tied to a request.
    ServerError(String),
}

/// JSON codec for the feed protocol.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON or matches no known shape.
    pub fn decode(&self, text: &str) -> Result<InboundMessage, CodecError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(mut object) = value else {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}",
                preview(text)
            )));
        };

        if let Some(Value::String(method)) = object.get("method") {
            let method = method.clone();
            return Ok(InboundMessage::Update(decode_update(&method, &mut object)));
        }

        if let Some(id) = object.get("id") {
            let id = parse_request_id(id).ok_or_else(|| {
                CodecError::InvalidFormat(format!("invalid acknowledgement id: {id}"))
            })?;
            let error = object
                .get("error")
                .filter(|e| !e.is_null())
                .map(error_text);
            return Ok(InboundMessage::Ack(Acknowledgement { id, error }));
        }

        if let Some(error) = object.get("error") {
            return Ok(InboundMessage::ServerError(error_text(error)));
        }

        Err(CodecError::Unrecognized(preview(text)))
    }

    /// Encode a subscription request.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode_request(&self, request: &SubscriptionRequest) -> Result<String, CodecError> {
        Ok(serde_json::to_string(request)?)
    }
}

/// Build a topic update from an object carrying a `method`.
fn decode_update(method: &str, object: &mut Map<String, Value>) -> TopicUpdate {
    let params = object.remove("params").unwrap_or(Value::Null);

    // Channel-push variant: routing in params, payload in data.
    let (topic, params) = match (object.remove("data"), pushed_symbol(&params)) {
        (Some(data), Some(symbol)) => {
            let channel = params
                .get("channel")
                .and_then(Value::as_str)
                .unwrap_or(method);
            (Topic::new(format!("{channel}.{symbol}")), data)
        }
        _ => (Topic::new(method), params),
    };

    let quotes = decode_quotes(&topic, &params);
    TopicUpdate {
        topic,
        params,
        quotes,
    }
}

fn pushed_symbol(params: &Value) -> Option<String> {
    params
        .get("symbol")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase)
}

/// Interpret a payload as quotes: an object is one ticker, an array is an
/// overview. Payloads that are not ticker-shaped yield `QuotePayload::None`.
fn decode_quotes(topic: &Topic, params: &Value) -> QuotePayload {
    match params {
        Value::Object(_) => ticker_quote(params, topic.symbol())
            .map_or(QuotePayload::None, QuotePayload::Single),
        Value::Array(items) => {
            let quotes: Vec<_> = items
                .iter()
                .filter_map(|item| ticker_quote(item, None))
                .collect();
            if quotes.is_empty() {
                QuotePayload::None
            } else {
                QuotePayload::Overview(quotes)
            }
        }
        _ => QuotePayload::None,
    }
}

fn ticker_quote(value: &Value, topic_symbol: Option<String>) -> Option<Quote> {
    let ticker = TickerPayload::deserialize(value).ok()?;
    let symbol = ticker
        .symbol
        .filter(|s| !s.is_empty())
        .map(|s| s.to_uppercase())
        .or(topic_symbol)?;

    Some(Quote {
        symbol,
        price: ticker.price,
        high_24h: ticker.high,
        low_24h: ticker.low,
        volume_24h: ticker.volume,
        change_percent_24h: ticker.change_percent.unwrap_or_default(),
        updated_at: Utc::now(),
        origin: QuoteOrigin::Live,
    })
}

fn parse_request_id(id: &Value) -> Option<RequestId> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn error_text(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(o) => o
            .get("msg")
            .or_else(|| o.get("message"))
            .and_then(Value::as_str)
            .map_or_else(|| error.to_string(), str::to_string),
        other => other.to_string(),
    }
}

fn preview(text: &str) -> String {
    text.chars().take(50).collect()
}
