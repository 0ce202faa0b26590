//! Feed client lifecycle tests.
//!
//! Drives `FeedClient` against a scripted in-memory connector with the
//! Tokio clock paused, so backoff and watchdog timings are exact.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{MockConnector, Script, record_events, settle, test_config, ticker};
use market_feed::{
    ConnectionState, FallbackState, FeedClient, FeedConfig, Frame, QuoteOrigin, WebSocketSettings,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio_test::{assert_err, assert_ok};

fn client_with(config: FeedConfig, connector: &Arc<MockConnector>) -> FeedClient {
    FeedClient::new(config, connector.clone()).unwrap()
}

// =============================================================================
// Fallback
// =============================================================================

#[tokio::test(start_paused = true)]
async fn unreachable_feed_serves_fallback_after_timeout() {
    let connector = MockConnector::refusing();
    let client = client_with(test_config(), &connector);
    client.start().unwrap();

    tokio::time::sleep(Duration::from_millis(2_999)).await;
    assert!(client.is_live());
    assert!(client.snapshot("BTCUSDT").is_none());

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert!(!client.is_live());

    let btc = client.snapshot("BTCUSDT").unwrap();
    assert_eq!(btc.origin, QuoteOrigin::Fallback);
    assert!(btc.price > Decimal::ZERO);
    assert!(client.snapshot("ethusdt").is_some());

    client.shutdown();
}

#[tokio::test(start_paused = true)]
async fn live_data_supersedes_fallback() {
    let (connector, mut sessions) = MockConnector::new([Script::Accept]);
    let client = client_with(test_config().with_topics(["ticker.BTCUSDT"]), &connector);
    client.start().unwrap();

    let mut session = sessions.recv().await.unwrap();
    let request = session.next_json().await;
    assert_eq!(request["method"], "SUBSCRIBE");

    // Open but silent: the watchdog still fires.
    tokio::time::sleep(Duration::from_millis(3_001)).await;
    assert!(!client.is_live());
    assert_eq!(client.status().fallback, FallbackState::Active);

    session.push(ticker("BTCUSDT", "43500.5"));
    settle().await;

    assert!(client.is_live());
    let btc = client.snapshot("BTCUSDT").unwrap();
    assert_eq!(btc.origin, QuoteOrigin::Live);
    assert_eq!(btc.price, Decimal::new(435_005, 1));
    assert_eq!(
        client.snapshot("ETHUSDT").unwrap().origin,
        QuoteOrigin::Fallback
    );

    client.shutdown();
}

#[tokio::test(start_paused = true)]
async fn updates_without_quotes_do_not_count_as_live() {
    let (connector, mut sessions) = MockConnector::new([Script::Accept]);
    let client = client_with(test_config(), &connector);
    client.start().unwrap();

    let session = sessions.recv().await.unwrap();
    let depth = r#"{"method":"depth.BTCUSDT","params":{"bids":[],"asks":[]}}"#;

    // Armed: depth and heartbeats leave the watchdog running.
    session.push(depth);
    session.push(r#"{"method":"heartbeat"}"#);
    settle().await;
    assert_eq!(client.status().fallback, FallbackState::Armed);

    tokio::time::sleep(Duration::from_millis(3_001)).await;
    assert!(!client.is_live());

    // Active: still synthetic after another depth frame.
    session.push(depth);
    settle().await;
    assert!(!client.is_live());
    assert_eq!(
        client.snapshot("BTCUSDT").unwrap().origin,
        QuoteOrigin::Fallback
    );

    session.push(ticker("BTCUSDT", "43000"));
    settle().await;
    assert!(client.is_live());
    assert_eq!(client.snapshot("BTCUSDT").unwrap().origin, QuoteOrigin::Live);

    client.shutdown();
}

#[tokio::test(start_paused = true)]
async fn dropped_live_connection_falls_back_after_timeout() {
    let (connector, mut sessions) = MockConnector::new([Script::Accept]);
    let client = client_with(test_config().with_topics(["ticker.BTCUSDT"]), &connector);
    client.start().unwrap();

    let session = sessions.recv().await.unwrap();
    session.push(ticker("BTCUSDT", "43500"));
    settle().await;
    assert_eq!(client.status().fallback, FallbackState::Disarmed);

    // Every reconnect is refused from here on.
    drop(session);
    settle().await;
    assert_eq!(client.status().fallback, FallbackState::Armed);

    tokio::time::sleep(Duration::from_millis(2_900)).await;
    assert!(client.is_live());
    assert_eq!(client.snapshot("BTCUSDT").unwrap().origin, QuoteOrigin::Live);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!client.is_live());
    assert_eq!(
        client.snapshot("BTCUSDT").unwrap().origin,
        QuoteOrigin::Fallback
    );
    assert_eq!(
        client.snapshot("ETHUSDT").unwrap().origin,
        QuoteOrigin::Fallback
    );
    assert!(!client.status().exhausted);

    client.shutdown();
}

#[tokio::test(start_paused = true)]
async fn shutdown_after_dropped_connection_never_falls_back() {
    let (connector, mut sessions) = MockConnector::new([Script::Accept]);
    let client = client_with(test_config(), &connector);
    client.start().unwrap();

    let session = sessions.recv().await.unwrap();
    session.push(ticker("BTCUSDT", "43500"));
    settle().await;

    drop(session);
    settle().await;
    assert_eq!(client.status().fallback, FallbackState::Armed);

    client.shutdown();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(client.is_live());
    assert_eq!(client.status().fallback, FallbackState::Disarmed);
    assert_eq!(client.snapshot("BTCUSDT").unwrap().origin, QuoteOrigin::Live);
    assert!(client.snapshot("ETHUSDT").is_none());
}

#[tokio::test(start_paused = true)]
async fn live_data_before_timeout_disarms_watchdog() {
    let (connector, mut sessions) = MockConnector::new([Script::Accept]);
    let client = client_with(test_config(), &connector);
    client.start().unwrap();

    let session = sessions.recv().await.unwrap();
    session.push(ticker("ETHUSDT", "3200"));
    settle().await;
    assert_eq!(client.status().fallback, FallbackState::Disarmed);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(client.is_live());
    assert!(client.snapshot("BTCUSDT").is_none());

    client.shutdown();
}

#[tokio::test(start_paused = true)]
async fn exhausted_reconnect_activates_fallback_immediately() {
    let settings = WebSocketSettings {
        heartbeat_interval: None,
        max_reconnect_attempts: 2,
        ..WebSocketSettings::default()
    };
    let config = test_config()
        .with_websocket(settings)
        .with_fallback_timeout(Duration::from_secs(60));
    let connector = MockConnector::refusing();
    let client = client_with(config, &connector);
    let events = record_events(&client);
    client.start().unwrap();

    // Attempts at 0s, 1s and 3s; the third failure exhausts the budget.
    tokio::time::sleep(Duration::from_millis(3_500)).await;

    assert_eq!(connector.attempt_count(), 3);
    assert!(client.status().exhausted);
    assert!(!client.is_live());
    assert_eq!(
        client.snapshot("BTCUSDT").unwrap().origin,
        QuoteOrigin::Fallback
    );
    assert_eq!(
        events.lock().last().map(String::as_str),
        Some("error:reconnect attempts exhausted after 2 attempts")
    );

    // Nothing else is scheduled.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempt_count(), 3);

    client.shutdown();
}

#[tokio::test(start_paused = true)]
async fn manual_reconnect_after_exhaustion_restores_live_data() {
    let settings = WebSocketSettings {
        heartbeat_interval: None,
        max_reconnect_attempts: 1,
        ..WebSocketSettings::default()
    };
    let (connector, mut sessions) = MockConnector::new([Script::Refuse, Script::Refuse]);
    let client = client_with(test_config().with_websocket(settings), &connector);
    client.start().unwrap();

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(client.status().exhausted);
    assert!(!client.is_live());

    connector.extend([Script::Accept]);
    client.reconnect().unwrap();

    let session = sessions.recv().await.unwrap();
    assert_eq!(client.connection_state(), ConnectionState::Open);
    assert!(!client.status().exhausted);

    session.push(ticker("BTCUSDT", "44000"));
    settle().await;
    assert!(client.is_live());
    assert_eq!(client.snapshot("BTCUSDT").unwrap().origin, QuoteOrigin::Live);

    client.shutdown();
}

// =============================================================================
// Dispatch
// =============================================================================

#[tokio::test(start_paused = true)]
async fn update_reaches_topic_listener_then_wildcard_once_each() {
    let (connector, mut sessions) = MockConnector::new([Script::Accept]);
    let client = client_with(test_config().with_topics(["ticker.BTCUSDT"]), &connector);

    let calls = Arc::new(Mutex::new(Vec::new()));
    for channel in ["*", "ticker.BTCUSDT", "ticker.ETHUSDT"] {
        let calls = Arc::clone(&calls);
        client.on_update(channel, move |update| {
            calls.lock().push((channel, update.topic.to_string()));
            Ok(())
        });
    }
    client.start().unwrap();

    let session = sessions.recv().await.unwrap();
    session.push(ticker("BTCUSDT", "43500"));
    settle().await;

    assert_eq!(
        *calls.lock(),
        vec![
            ("ticker.BTCUSDT", "ticker.BTCUSDT".to_string()),
            ("*", "ticker.BTCUSDT".to_string()),
        ]
    );

    client.shutdown();
}

#[tokio::test(start_paused = true)]
async fn failing_listener_does_not_block_others() {
    let (connector, mut sessions) = MockConnector::new([Script::Accept]);
    let client = client_with(test_config(), &connector);

    let delivered = Arc::new(AtomicUsize::new(0));
    client.on("*", |_| anyhow::bail!("listener failed"));
    client.on("*", |_| panic!("listener panicked"));
    {
        let delivered = Arc::clone(&delivered);
        client.on("*", move |_| {
            delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }
    client.start().unwrap();

    let session = sessions.recv().await.unwrap();
    session.push(ticker("BTCUSDT", "1"));
    session.push(ticker("BTCUSDT", "2"));
    settle().await;

    assert_eq!(delivered.load(Ordering::SeqCst), 2);
    assert_eq!(client.connection_state(), ConnectionState::Open);

    client.shutdown();
}

#[tokio::test(start_paused = true)]
async fn malformed_and_server_error_frames_keep_connection_open() {
    let (connector, mut sessions) = MockConnector::new([Script::Accept]);
    let client = client_with(test_config(), &connector);
    let events = record_events(&client);
    client.start().unwrap();

    let session = sessions.recv().await.unwrap();
    session.push("not json");
    session.push(r#"{"error":"rate limited"}"#);
    session.push(ticker("BTCUSDT", "1"));
    settle().await;

    assert_eq!(
        *events.lock(),
        vec![
            "connected".to_string(),
            "error:server error: rate limited".to_string(),
            "message:ticker.BTCUSDT".to_string(),
        ]
    );
    assert_eq!(client.connection_state(), ConnectionState::Open);

    client.shutdown();
}

// =============================================================================
// Reconnect
// =============================================================================

#[tokio::test(start_paused = true)]
async fn backoff_grows_by_multiplier_up_to_cap() {
    let settings = WebSocketSettings {
        heartbeat_interval: None,
        reconnect_delay_initial: Duration::from_millis(1_000),
        reconnect_delay_max: Duration::from_millis(3_000),
        reconnect_delay_multiplier: 2.0,
        max_reconnect_attempts: 0,
        ..WebSocketSettings::default()
    };
    let connector = MockConnector::refusing();
    let client = client_with(test_config().with_websocket(settings), &connector);
    client.start().unwrap();

    tokio::time::sleep(Duration::from_millis(9_500)).await;
    client.shutdown();

    let attempts = connector.attempts();
    let gaps: Vec<_> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        gaps,
        vec![
            Duration::from_millis(1_000),
            Duration::from_millis(2_000),
            Duration::from_millis(3_000),
            Duration::from_millis(3_000),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn peer_close_reconnects_and_resets_attempts() {
    let (connector, mut sessions) =
        MockConnector::new([Script::Accept, Script::Refuse, Script::Accept]);
    let client = client_with(test_config(), &connector);
    let events = record_events(&client);
    client.start().unwrap();

    let first = sessions.recv().await.unwrap();
    drop(first);

    // Refused at 1s, accepted at 3s.
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(client.reconnect_attempts(), 2);
    assert_eq!(client.connection_state(), ConnectionState::Closed);

    let _second = sessions.recv().await.unwrap();
    assert_eq!(client.connection_state(), ConnectionState::Open);
    assert_eq!(client.reconnect_attempts(), 0);

    assert_eq!(
        *events.lock(),
        vec![
            "connected".to_string(),
            "error:connection closed by peer".to_string(),
            "disconnected".to_string(),
            "error:connect failed: endpoint unreachable: connection refused".to_string(),
            "disconnected".to_string(),
            "connected".to_string(),
        ]
    );

    client.shutdown();
}

#[tokio::test(start_paused = true)]
async fn transport_error_triggers_reconnect() {
    let (connector, mut sessions) = MockConnector::new([Script::Accept, Script::Accept]);
    let client = client_with(test_config(), &connector);
    client.start().unwrap();

    let first = sessions.recv().await.unwrap();
    first.fail("connection reset");
    settle().await;
    assert_eq!(client.connection_state(), ConnectionState::Closed);
    assert_eq!(client.reconnect_attempts(), 1);

    let _second = sessions.recv().await.unwrap();
    assert_eq!(connector.attempt_count(), 2);
    assert_eq!(client.connection_state(), ConnectionState::Open);

    client.shutdown();
}

// =============================================================================
// Subscriptions
// =============================================================================

#[tokio::test(start_paused = true)]
async fn subscriptions_are_idempotent_and_replayed_on_reconnect() {
    let (connector, mut sessions) = MockConnector::new([Script::Accept, Script::Accept]);
    let client = client_with(test_config(), &connector);

    client.subscribe("ticker.ETHUSDT").unwrap();
    client.subscribe("ticker.ETHUSDT").unwrap();
    client.start().unwrap();

    let mut first = sessions.recv().await.unwrap();
    let request = first.next_json().await;
    assert_eq!(request["method"], "SUBSCRIBE");
    assert_eq!(request["params"], serde_json::json!(["ticker.ETHUSDT"]));

    client.subscribe("ticker.ETHUSDT").unwrap();
    settle().await;
    assert_eq!(first.queued_frame(), None);
    assert_eq!(client.topics().len(), 1);

    drop(first);
    let mut second = sessions.recv().await.unwrap();
    let replayed = second.next_json().await;
    assert_eq!(replayed["method"], "SUBSCRIBE");
    assert_eq!(replayed["params"], serde_json::json!(["ticker.ETHUSDT"]));
    assert!(replayed["id"].as_u64().unwrap() > request["id"].as_u64().unwrap());
    settle().await;
    assert_eq!(second.queued_frame(), None);

    client.shutdown();
}

#[tokio::test(start_paused = true)]
async fn subscribe_and_unsubscribe_while_open_send_frames() {
    let (connector, mut sessions) = MockConnector::new([Script::Accept]);
    let client = client_with(test_config(), &connector);
    client.start().unwrap();

    let mut session = sessions.recv().await.unwrap();

    client.subscribe("market.overview").unwrap();
    let subscribe = session.next_json().await;
    assert_eq!(subscribe["method"], "SUBSCRIBE");
    assert_eq!(subscribe["params"], serde_json::json!(["market.overview"]));

    client.unsubscribe("market.overview").unwrap();
    let unsubscribe = session.next_json().await;
    assert_eq!(unsubscribe["method"], "UNSUBSCRIBE");
    assert_eq!(unsubscribe["params"], serde_json::json!(["market.overview"]));
    assert!(client.topics().is_empty());

    // Not active any more: nothing to send.
    client.unsubscribe("market.overview").unwrap();
    settle().await;
    assert_eq!(session.queued_frame(), None);

    client.shutdown();
}

#[tokio::test(start_paused = true)]
async fn raw_send_requires_open_connection() {
    let (connector, mut sessions) = MockConnector::new([Script::Accept]);
    let client = client_with(test_config(), &connector);

    assert_err!(client.send("hello"));

    client.start().unwrap();
    let mut session = sessions.recv().await.unwrap();
    assert_ok!(client.send(r#"{"method":"PING"}"#));
    assert_eq!(
        session.next_frame().await,
        Some(Frame::Text(r#"{"method":"PING"}"#.to_string()))
    );

    client.shutdown();
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test(start_paused = true)]
async fn shutdown_during_backoff_stops_everything() {
    let connector = MockConnector::refusing();
    let client = client_with(test_config(), &connector);
    let events = record_events(&client);
    client.start().unwrap();

    settle().await;
    assert_eq!(connector.attempt_count(), 1);

    client.shutdown();
    let seen = events.lock().len();

    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(connector.attempt_count(), 1);
    assert_eq!(events.lock().len(), seen);
    assert!(client.is_live());
    assert_eq!(client.status().fallback, FallbackState::Disarmed);
    assert!(client.snapshot_all().is_empty());
    assert_err!(client.start());
    assert_err!(client.subscribe("ticker.BTCUSDT"));
    assert_err!(client.reconnect());
}

#[tokio::test(start_paused = true)]
async fn shutdown_while_open_flushes_close_frame_and_emits_one_disconnect() {
    let (connector, mut sessions) = MockConnector::new([Script::Accept]);
    let client = client_with(test_config(), &connector);
    let events = record_events(&client);
    client.start().unwrap();

    let mut session = sessions.recv().await.unwrap();
    assert_ok!(client.send(r#"{"method":"PING"}"#));
    client.shutdown();
    client.shutdown();

    assert_eq!(
        session.next_frame().await,
        Some(Frame::Text(r#"{"method":"PING"}"#.to_string()))
    );
    assert_eq!(session.next_frame().await, Some(Frame::Close));
    assert_eq!(session.next_frame().await, None);

    assert_eq!(
        *events.lock(),
        vec!["connected".to_string(), "disconnected".to_string()]
    );
    assert_eq!(client.connection_state(), ConnectionState::Closed);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempt_count(), 1);
}
