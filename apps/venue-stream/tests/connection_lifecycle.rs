//! Connection Lifecycle Integration Tests
//!
//! Drives the real `ConnectionManager` against an in-memory venue: connect
//! idempotence, frame handling, send policies, close and reconnect.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use support::{
    EventLog, WAIT, connected, fast_reconnect, manager_with, test_config, wait_until,
};
use venue_stream::infrastructure::connection::{HeartbeatConfig, ReconnectConfig};
use venue_stream::{
    CloseKind, ConnectionError, ConnectionEvent, ConnectionState, OutboundFrame, SendPolicy,
    TransportError, WireMessage,
};

fn closes(events: &[ConnectionEvent], wanted: CloseKind) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ConnectionEvent::Close { kind, .. } if *kind == wanted))
        .count()
}

// =============================================================================
// Connect
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_connects_open_once() {
    let (manager, mut venue) = manager_with(test_config());

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect() })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let _session = venue.accept().await;
    manager.wait_until_open(WAIT).await.unwrap();
    manager.connect();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(venue.opens(), 1);
    assert!(!venue.has_pending());
    assert_eq!(manager.state(), ConnectionState::Open);
}

#[tokio::test]
async fn test_open_is_dispatched() {
    let (manager, mut venue) = manager_with(test_config());
    let log = EventLog::attach(&manager);

    manager.connect();
    assert_eq!(manager.state(), ConnectionState::Connecting);
    let _session = venue.accept().await;

    log.wait_until(|events| events.contains(&ConnectionEvent::Open))
        .await;
    assert!(manager.is_open());
}

// =============================================================================
// Inbound Frames
// =============================================================================

#[tokio::test]
async fn test_malformed_frame_does_not_block_next_frame() {
    let (manager, _venue, session) = connected(test_config()).await;
    let log = EventLog::attach(&manager);

    session.push_text("not json");
    session.push_text("[1, 2, 3]");
    session.push_json(&json!({"msg_type": "tick", "tick": {"quote": 1}}));

    log.wait_until(|events| !events.is_empty()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let events = log.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].frame().unwrap().msg_type(), Some("tick"));
    assert_eq!(manager.state(), ConnectionState::Open);
}

#[tokio::test]
async fn test_frames_are_dispatched_in_order() {
    let (manager, _venue, session) = connected(test_config()).await;
    let log = EventLog::attach(&manager);

    for n in 0..20 {
        session.push_json(&json!({"msg_type": "tick", "n": n}));
    }
    log.wait_until(|events| events.len() == 20).await;

    let order: Vec<u64> = log
        .events()
        .iter()
        .map(|e| e.frame().unwrap().get("n").unwrap().as_u64().unwrap())
        .collect();
    assert_eq!(order, (0..20).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_panicking_listener_is_isolated() {
    let (manager, _venue, session) = connected(test_config()).await;
    let _bad = manager.subscribe(|event| {
        if event.frame().is_some() {
            panic!("listener bug");
        }
    });
    let log = EventLog::attach(&manager);

    session.push_json(&json!({"msg_type": "ping", "ping": "pong"}));
    session.push_json(&json!({"msg_type": "ping", "ping": "pong"}));

    log.wait_until(|events| events.len() == 2).await;
    assert!(manager.is_open());
}

#[tokio::test]
async fn test_unsubscribed_listener_stops_receiving() {
    let (manager, _venue, session) = connected(test_config()).await;
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let handle = manager.subscribe(move |event| {
        if event.frame().is_some() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    let log = EventLog::attach(&manager);

    session.push_json(&json!({"msg_type": "tick", "n": 1}));
    log.wait_until(|events| events.len() == 1).await;

    assert!(handle.unsubscribe());
    assert!(!handle.unsubscribe());

    session.push_json(&json!({"msg_type": "tick", "n": 2}));
    log.wait_until(|events| events.len() == 2).await;

    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(manager.listener_count(), 1);
}

// =============================================================================
// Send Policy
// =============================================================================

#[tokio::test]
async fn test_buffered_frames_flush_on_open() {
    let (manager, mut venue) = manager_with(test_config());
    manager.connect();

    let frame = OutboundFrame::new().with("active_symbols", "brief");
    assert_ok!(manager.send(&frame));

    let mut session = venue.accept().await;
    assert_eq!(session.next_json().await, json!({"active_symbols": "brief"}));
}

#[tokio::test]
async fn test_fail_fast_rejects_until_open() {
    let config = test_config().with_send_policy(SendPolicy::FailFast);
    let (manager, mut venue) = manager_with(config);
    let frame = OutboundFrame::new().with("ping", 1);

    manager.connect();
    let err = assert_err!(manager.send(&frame));
    assert!(matches!(
        err,
        ConnectionError::NotConnected {
            state: ConnectionState::Connecting
        }
    ));

    let mut session = venue.accept().await;
    manager.wait_until_open(WAIT).await.unwrap();
    assert_ok!(manager.send(&frame));
    assert_eq!(session.next_json().await, json!({"ping": 1}));
}

#[tokio::test]
async fn test_send_after_final_close_is_rejected() {
    let (manager, _venue, session) = connected(test_config()).await;
    let log = EventLog::attach(&manager);

    session.close("maintenance");
    log.wait_until(|events| closes(events, CloseKind::Final) == 1)
        .await;

    assert!(matches!(
        manager.send(&OutboundFrame::new().with("ping", 1)),
        Err(ConnectionError::NotConnected {
            state: ConnectionState::Closed
        })
    ));
}

// =============================================================================
// Close
// =============================================================================

#[tokio::test]
async fn test_close_sends_close_frame_and_keeps_listeners() {
    let (manager, mut venue, mut session) = connected(test_config()).await;
    let log = EventLog::attach(&manager);

    manager.close().await;

    assert_eq!(
        session.next_sent().await,
        WireMessage::Close {
            code: Some(1000),
            reason: "closed by client".to_string(),
        }
    );
    assert_eq!(manager.state(), ConnectionState::Closed);
    assert_eq!(closes(&log.events(), CloseKind::Requested), 1);
    assert_eq!(manager.listener_count(), 1);

    // Closing twice is harmless.
    manager.close().await;

    manager.connect();
    let _second = venue.accept().await;
    log.wait_until(|events| events.contains(&ConnectionEvent::Open))
        .await;
    assert_eq!(venue.opens(), 2);
}

#[tokio::test]
async fn test_transport_error_without_reconnect_is_final() {
    let (manager, _venue, session) = connected(test_config()).await;
    let log = EventLog::attach(&manager);

    session.fail(TransportError::WebSocket("connection reset".to_string()));
    log.wait_until(|events| closes(events, CloseKind::Final) == 1)
        .await;

    let events = log.events();
    assert_eq!(
        events[0],
        ConnectionEvent::Error(TransportError::WebSocket("connection reset".to_string()))
    );
    assert!(matches!(
        events[1],
        ConnectionEvent::Close {
            kind: CloseKind::Final,
            ..
        }
    ));
    assert_eq!(manager.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_stream_end_without_close_frame_is_an_error() {
    let (manager, _venue, session) = connected(test_config()).await;
    let log = EventLog::attach(&manager);

    drop(session);
    log.wait_until(|events| closes(events, CloseKind::Final) == 1)
        .await;

    assert_eq!(
        log.events(),
        vec![
            ConnectionEvent::Error(TransportError::Closed),
            ConnectionEvent::Close {
                reason: "connection closed".to_string(),
                kind: CloseKind::Final,
            },
        ]
    );
    assert_eq!(manager.state(), ConnectionState::Closed);
}

// =============================================================================
// Reconnect
// =============================================================================

#[tokio::test]
async fn test_reconnects_after_drop() {
    let config = test_config().with_reconnect(Some(fast_reconnect(3)));
    let (manager, mut venue, session) = connected(config).await;
    let log = EventLog::attach(&manager);

    session.close("going away");
    let _second = venue.accept().await;

    log.wait_until(|events| events.contains(&ConnectionEvent::Open))
        .await;
    let events = log.events();
    assert_eq!(
        events[0],
        ConnectionEvent::Close {
            reason: "going away".to_string(),
            kind: CloseKind::Reconnecting,
        }
    );
    assert_eq!(venue.opens(), 2);
    assert!(manager.is_open());
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let config = test_config().with_reconnect(Some(fast_reconnect(2)));
    let (manager, venue, session) = connected(config).await;
    let log = EventLog::attach(&manager);

    venue.refuse_next(10);
    session.fail(TransportError::WebSocket("reset".to_string()));

    log.wait_until(|events| closes(events, CloseKind::Final) == 1)
        .await;

    let events = log.events();
    assert_eq!(closes(&events, CloseKind::Reconnecting), 2);
    assert_eq!(log.count("error"), 3);
    assert_eq!(venue.opens(), 3);
    assert_eq!(manager.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_attempts_reset_after_successful_open() {
    let config = test_config().with_reconnect(Some(fast_reconnect(1)));
    let (manager, mut venue, session) = connected(config).await;
    let log = EventLog::attach(&manager);

    // Each drop uses the single allowed attempt, then the open resets it.
    session.close("first");
    let second = venue.accept().await;
    wait_until(|| manager.is_open()).await;

    second.close("second");
    let _third = venue.accept().await;
    wait_until(|| manager.is_open()).await;

    assert_eq!(closes(&log.events(), CloseKind::Reconnecting), 2);
    assert_eq!(closes(&log.events(), CloseKind::Final), 0);
}

#[tokio::test]
async fn test_close_during_backoff_cancels_reconnect() {
    let reconnect = ReconnectConfig {
        initial_delay: Duration::from_secs(60),
        jitter_factor: 0.0,
        ..ReconnectConfig::default()
    };
    let (manager, venue, session) = connected(test_config().with_reconnect(Some(reconnect))).await;
    let log = EventLog::attach(&manager);

    session.close("going away");
    log.wait_until(|events| closes(events, CloseKind::Reconnecting) == 1)
        .await;

    tokio::time::timeout(WAIT, manager.close()).await.unwrap();

    assert_eq!(
        log.events().last(),
        Some(&ConnectionEvent::Close {
            reason: "closed by client".to_string(),
            kind: CloseKind::Requested,
        })
    );
    assert_eq!(venue.opens(), 1);
    assert_eq!(manager.state(), ConnectionState::Closed);
}

// =============================================================================
// Keep-alive
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_silent_venue_trips_heartbeat() {
    let heartbeat = HeartbeatConfig {
        ping_interval: Duration::from_millis(50),
        pong_timeout: Duration::from_millis(120),
    };
    let (manager, _venue, mut session) = connected(test_config().with_heartbeat(Some(heartbeat))).await;
    let log = EventLog::attach(&manager);

    assert_eq!(
        session.next_json().await,
        json!({"ping": 1, "passthrough": {"heartbeat": true}})
    );

    log.wait_until(|events| {
        events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::Error(TransportError::HeartbeatTimeout(_))))
    })
    .await;
    log.wait_until(|events| closes(events, CloseKind::Final) == 1)
        .await;
}
