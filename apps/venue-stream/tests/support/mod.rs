//! Shared helpers for integration tests.
//!
//! `MockTransport` stands in for the venue: every `open` hands the test a
//! `MockSession` that can push inbound frames and read what the client sent.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;

use venue_stream::infrastructure::connection::ReconnectConfig;
use venue_stream::{
    ConnectionConfig, ConnectionEvent, ConnectionManager, Transport, TransportError,
    TransportLink, WireMessage,
};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Mock Transport
// =============================================================================

/// In-memory transport.
pub struct MockTransport {
    opens: AtomicUsize,
    refuse_next: AtomicUsize,
    sessions: mpsc::UnboundedSender<MockSession>,
}

/// Receives a `MockSession` per successful open.
pub struct MockVenue {
    transport: Arc<MockTransport>,
    sessions: mpsc::UnboundedReceiver<MockSession>,
}

impl MockVenue {
    /// Create a venue and the transport that reaches it.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            transport: Arc::new(MockTransport {
                opens: AtomicUsize::new(0),
                refuse_next: AtomicUsize::new(0),
                sessions: tx,
            }),
            sessions: rx,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, _url: &str) -> Result<TransportLink, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .refuse_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::ConnectFailed("refused by mock".to_string()));
        }

        let (inbound_tx, inbound_rx) = fmpsc::unbounded::<Result<WireMessage, TransportError>>();
        let (outbound_tx, outbound_rx) = fmpsc::unbounded::<WireMessage>();

        let _ = self.sessions.send(MockSession {
            inbound: inbound_tx,
            outbound: outbound_rx,
        });

        Ok(TransportLink {
            sink: Box::pin(
                outbound_tx.sink_map_err(|e| TransportError::WebSocket(e.to_string())),
            ),
            stream: Box::pin(inbound_rx),
        })
    }
}

impl MockVenue {
    /// The transport to hand to a `ConnectionManager`.
    pub fn transport(&self) -> Arc<MockTransport> {
        Arc::clone(&self.transport)
    }

    /// Number of `open` calls so far.
    pub fn opens(&self) -> usize {
        self.transport.opens.load(Ordering::SeqCst)
    }

    /// Refuse the next `n` opens.
    pub fn refuse_next(&self, n: usize) {
        self.transport.refuse_next.store(n, Ordering::SeqCst);
    }

    /// Wait for the client to open a connection.
    pub async fn accept(&mut self) -> MockSession {
        timeout(WAIT, self.sessions.recv())
            .await
            .expect("no connection opened in time")
            .expect("transport dropped")
    }

    /// Whether a connection was opened that has not been accepted yet.
    pub fn has_pending(&mut self) -> bool {
        !self.sessions.is_empty()
    }
}

/// One open connection, seen from the venue.
pub struct MockSession {
    inbound: fmpsc::UnboundedSender<Result<WireMessage, TransportError>>,
    outbound: fmpsc::UnboundedReceiver<WireMessage>,
}

impl MockSession {
    /// Deliver a raw text frame.
    pub fn push_text(&self, text: &str) {
        self.inbound
            .unbounded_send(Ok(WireMessage::Text(text.to_string())))
            .unwrap();
    }

    /// Deliver a JSON frame.
    pub fn push_json(&self, value: &Value) {
        self.push_text(&value.to_string());
    }

    /// Fail the socket.
    pub fn fail(&self, error: TransportError) {
        self.inbound.unbounded_send(Err(error)).unwrap();
    }

    /// Send a close frame.
    pub fn close(&self, reason: &str) {
        self.inbound
            .unbounded_send(Ok(WireMessage::Close {
                code: Some(1001),
                reason: reason.to_string(),
            }))
            .unwrap();
    }

    /// Next frame the client wrote.
    pub async fn next_sent(&mut self) -> WireMessage {
        timeout(WAIT, self.outbound.next())
            .await
            .expect("client sent nothing in time")
            .expect("client closed the sink")
    }

    /// Next text frame the client wrote, parsed as JSON.
    pub async fn next_json(&mut self) -> Value {
        match self.next_sent().await {
            WireMessage::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    /// Assert the client writes nothing for `quiet`.
    pub async fn assert_silent(&mut self, quiet: Duration) {
        if let Ok(Some(frame)) = timeout(quiet, self.outbound.next()).await {
            panic!("unexpected frame from client: {frame:?}");
        }
    }
}

// =============================================================================
// Manager Helpers
// =============================================================================

/// Config with no keep-alive and no reconnect.
pub fn test_config() -> ConnectionConfig {
    ConnectionConfig::new("ws://venue.mock/websockets/v3")
        .with_heartbeat(None)
        .with_reconnect(None)
}

/// Fast, jitter-free reconnect.
pub fn fast_reconnect(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        multiplier: 2.0,
        jitter_factor: 0.0,
        max_attempts,
    }
}

/// Manager over a fresh mock venue.
pub fn manager_with(config: ConnectionConfig) -> (ConnectionManager, MockVenue) {
    let venue = MockVenue::new();
    let manager = ConnectionManager::new(config, venue.transport());
    (manager, venue)
}

/// Connect and accept the resulting session.
pub async fn connected(config: ConnectionConfig) -> (ConnectionManager, MockVenue, MockSession) {
    let (manager, mut venue) = manager_with(config);
    manager.connect();
    let session = venue.accept().await;
    manager.wait_until_open(WAIT).await.unwrap();
    (manager, venue, session)
}

// =============================================================================
// Event Recording
// =============================================================================

/// Records every event a listener sees.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<ConnectionEvent>>>);

impl EventLog {
    /// Register on `manager`.
    pub fn attach(manager: &ConnectionManager) -> Self {
        let log = Self::default();
        let sink = log.clone();
        let _handle = manager.subscribe(move |event| sink.0.lock().push(event.clone()));
        log
    }

    /// Snapshot.
    pub fn events(&self) -> Vec<ConnectionEvent> {
        self.0.lock().clone()
    }

    /// Events of one kind.
    pub fn count(&self, kind: &str) -> usize {
        self.0.lock().iter().filter(|e| e.kind() == kind).count()
    }

    /// Wait until `predicate` holds for the recorded events.
    pub async fn wait_until<F>(&self, predicate: F)
    where
        F: Fn(&[ConnectionEvent]) -> bool,
    {
        wait_until(|| predicate(&self.0.lock())).await;
    }
}

/// Poll `condition` until it holds or `WAIT` elapses.
pub async fn wait_until<F>(condition: F)
where
    F: Fn() -> bool,
{
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// The passthrough the client attached to `request`, for building a reply.
pub fn passthrough_of(request: &Value) -> Value {
    request.get("passthrough").cloned().unwrap_or(Value::Null)
}
