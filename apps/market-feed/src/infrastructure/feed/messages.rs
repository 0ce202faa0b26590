//! Feed Wire Message Types
//!
//! JSON shapes exchanged with the market-data server.
//!
//! # Outbound
//!
//! ```json
//! {"method": "SUBSCRIBE", "params": ["ticker.BTCUSDT"], "id": 1}
//! {"method": "UNSUBSCRIBE", "params": ["ticker.BTCUSDT"], "id": 2}
//! ```
//!
//! # Inbound
//!
//! ```json
//! {"method": "ticker.BTCUSDT", "params": {"price": "43500.10", ...}}
//! {"method": "ticker", "params": {"symbol": "BTCUSDT", "channel": "ticker"}, "data": {...}}
//! {"method": "market.overview", "params": [{"symbol": "BTCUSDT", ...}, ...]}
//! {"id": 1, "result": "success"}
//! {"id": "2", "error": "unknown topic"}
//! {"error": "rate limited"}
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::streaming::Topic;
use crate::domain::subscription::RequestId;

// =============================================================================
// Outbound
// =============================================================================

/// Subscription request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    /// Start receiving a topic.
    Subscribe,
    /// Stop receiving a topic.
    Unsubscribe,
}

/// A subscribe or unsubscribe frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// Request method.
    pub method: RequestMethod,
    /// Topics the request applies to.
    pub params: Vec<Topic>,
    /// Correlation id echoed in the acknowledgement.
    pub id: RequestId,
}

impl SubscriptionRequest {
    /// Subscribe to one topic.
    #[must_use]
    pub fn subscribe(topic: Topic, id: RequestId) -> Self {
        Self {
            method: RequestMethod::Subscribe,
            params: vec![topic],
            id,
        }
    }

    /// Unsubscribe from one topic.
    #[must_use]
    pub fn unsubscribe(topic: Topic, id: RequestId) -> Self {
        Self {
            method: RequestMethod::Unsubscribe,
            params: vec![topic],
            id,
        }
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// Ticker fields as published by the server.
///
/// Several naming conventions are accepted. Values may be JSON numbers or
/// decimal strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TickerPayload {
    /// Symbol, when the payload names it.
    #[serde(default, alias = "s")]
    pub symbol: Option<String>,

    /// Last price.
    #[serde(alias = "lastPrice", alias = "c")]
    pub price: Decimal,

    /// 24h high.
    #[serde(alias = "high24h", alias = "highPrice", alias = "h")]
    pub high: Decimal,

    /// 24h low.
    #[serde(alias = "low24h", alias = "lowPrice", alias = "l")]
    pub low: Decimal,

    /// 24h volume.
    #[serde(alias = "volume24h", alias = "v")]
    pub volume: Decimal,

    /// 24h change in percent.
    #[serde(
        default,
        rename = "changePercent",
        alias = "priceChangePercent",
        alias = "change24h",
        alias = "P"
    )]
    pub change_percent: Option<Decimal>,
}

/// Acknowledgement of a subscription request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgement {
    /// Request id being acknowledged.
    pub id: RequestId,
    /// Rejection reason, if the server refused the request.
    pub error: Option<String>,
}

impl Acknowledgement {
    /// Whether the server accepted the request.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_request_wire_format() {
        let request = SubscriptionRequest::subscribe(Topic::from("ticker.BTCUSDT"), 7);
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"method":"SUBSCRIBE","params":["ticker.BTCUSDT"],"id":7}"#
        );
    }

    #[test]
    fn unsubscribe_request_wire_format() {
        let request = SubscriptionRequest::unsubscribe(Topic::from("market.overview"), 9);
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"method":"UNSUBSCRIBE","params":["market.overview"],"id":9}"#
        );
    }

    #[test]
    fn ticker_accepts_strings_and_numbers() {
        let ticker: TickerPayload = serde_json::from_str(
            r#"{"price":"43500.10","high":44000,"low":"42000","volume":1234.5,"changePercent":"-1.25"}"#,
        )
        .unwrap();

        assert_eq!(ticker.price, Decimal::new(4_350_010, 2));
        assert_eq!(ticker.high, Decimal::new(44_000, 0));
        assert_eq!(ticker.change_percent, Some(Decimal::new(-125, 2)));
        assert_eq!(ticker.symbol, None);
    }

    #[test]
    fn ticker_accepts_exchange_style_keys() {
        let ticker: TickerPayload = serde_json::from_str(
            r#"{"s":"ETHUSDT","c":"3200.5","h":"3300","l":"3100","v":"9999","P":"2.5"}"#,
        )
        .unwrap();

        assert_eq!(ticker.symbol.as_deref(), Some("ETHUSDT"));
        assert_eq!(ticker.price, Decimal::new(32_005, 1));
        assert_eq!(ticker.change_percent, Some(Decimal::new(25, 1)));
    }

    #[test]
    fn ticker_requires_range_and_volume() {
        let result: Result<TickerPayload, _> = serde_json::from_str(r#"{"price":"1"}"#);
        assert!(result.is_err());
    }
}
