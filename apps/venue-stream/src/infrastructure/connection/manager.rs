//! Connection Manager
//!
//! Owns the one physical connection to the venue and fans its events out to
//! every listener.
//!
//! A single driver task per `connect()` holds the socket: it opens the
//! transport, writes queued outbound frames, decodes inbound frames, runs the
//! keep-alive and reconnects with backoff after a lost connection. Everything
//! else talks to it through [`ConnectionManager::send`] and
//! [`ConnectionManager::subscribe`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::codec::{CodecError, JsonCodec};
use super::dispatcher::{Dispatcher, ListenerHandle};
use super::heartbeat::{self, Heartbeat, HeartbeatAction, HeartbeatConfig};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{Transport, TransportLink, WireMessage};
use crate::domain::event::{CloseKind, ConnectionEvent, ConnectionState, TransportError};
use crate::domain::frame::{InboundFrame, OutboundFrame};
use crate::infrastructure::config::{SendPolicy, WebSocketSettings};
use crate::infrastructure::metrics::{self, DropReason};

const CLIENT_CLOSE_REASON: &str = "closed by client";
const NORMAL_CLOSURE: u16 = 1000;

// =============================================================================
// Errors
// =============================================================================

/// Errors returned to callers of the manager.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The current state does not accept frames under the active send policy.
    #[error("not connected (state: {state})")]
    NotConnected {
        /// State at the time of the call.
        state: ConnectionState,
    },

    /// The outbound queue is full.
    #[error("outbound queue full")]
    SendQueueFull,

    /// The frame could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

// =============================================================================
// Configuration
// =============================================================================

/// Connection Manager configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket endpoint.
    pub url: String,
    /// When `send` accepts frames.
    pub send_policy: SendPolicy,
    /// Outbound queue capacity.
    pub outbound_capacity: usize,
    /// Limit for a single transport open.
    pub connect_timeout: Duration,
    /// Backoff after a lost connection; `None` never reconnects.
    pub reconnect: Option<ReconnectConfig>,
    /// Keep-alive; `None` disables it.
    pub heartbeat: Option<HeartbeatConfig>,
}

impl ConnectionConfig {
    /// Default settings for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self::from_settings(url, &WebSocketSettings::default())
    }

    /// Build from WebSocket settings.
    #[must_use]
    pub fn from_settings(url: impl Into<String>, settings: &WebSocketSettings) -> Self {
        Self {
            url: url.into(),
            send_policy: settings.send_policy,
            outbound_capacity: settings.outbound_capacity,
            connect_timeout: settings.connect_timeout,
            reconnect: ReconnectConfig::from_settings(settings),
            heartbeat: HeartbeatConfig::from_settings(settings),
        }
    }

    /// Set the send policy.
    #[must_use]
    pub const fn with_send_policy(mut self, policy: SendPolicy) -> Self {
        self.send_policy = policy;
        self
    }

    /// Set the outbound queue capacity.
    #[must_use]
    pub const fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set (or disable) reconnecting.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: Option<ReconnectConfig>) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set (or disable) the keep-alive.
    #[must_use]
    pub const fn with_heartbeat(mut self, heartbeat: Option<HeartbeatConfig>) -> Self {
        self.heartbeat = heartbeat;
        self
    }
}

// =============================================================================
// Manager
// =============================================================================

struct DriverSlot {
    id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    codec: JsonCodec,
    dispatcher: Dispatcher,
    state_tx: watch::Sender<ConnectionState>,
    outbound_tx: mpsc::Sender<String>,
    // Held by the running driver for its whole lifetime.
    outbound_rx: tokio::sync::Mutex<mpsc::Receiver<String>>,
    driver: Mutex<Option<DriverSlot>>,
    next_driver_id: AtomicU64,
}

enum SessionEnd {
    Requested,
    Lost(String),
}

/// Handle to the shared venue connection. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl ConnectionManager {
    /// Create a manager. Nothing is opened until [`connect`](Self::connect).
    #[must_use]
    pub fn new(config: ConnectionConfig, transport: Arc<dyn Transport>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        metrics::set_connection_state(ConnectionState::Closed);

        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                codec: JsonCodec::new(),
                dispatcher: Dispatcher::new(),
                state_tx,
                outbound_tx,
                outbound_rx: tokio::sync::Mutex::new(outbound_rx),
                driver: Mutex::new(None),
                next_driver_id: AtomicU64::new(0),
            }),
        }
    }

    /// Start the driver task if none is running.
    ///
    /// Idempotent: while a driver exists (connecting, open or waiting to
    /// reconnect) this does nothing. Must be called within a Tokio runtime.
    pub fn connect(&self) {
        let mut slot = self.inner.driver.lock();
        if slot.is_some() {
            return;
        }
        let current = self.state();
        if !current.can_transition_to(ConnectionState::Connecting)
            || !self.inner.transition(ConnectionState::Connecting)
        {
            tracing::debug!(state = %current, "Connect ignored while connection is shutting down");
            return;
        }

        let id = self.inner.next_driver_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let span = tracing::info_span!("venue_connection", driver = id);
        let handle = tokio::spawn(
            Arc::clone(&self.inner)
                .run_driver(id, cancel.clone())
                .instrument(span),
        );
        *slot = Some(DriverSlot { id, cancel, handle });
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Listeners stay registered and keep receiving events after a later
    /// [`connect`](Self::connect).
    pub async fn close(&self) {
        let slot = self.inner.driver.lock().take();
        let Some(slot) = slot else {
            return;
        };

        slot.cancel.cancel();
        if let Err(e) = slot.handle.await {
            tracing::error!(driver = slot.id, error = %e, "Connection driver task failed");
        }
    }

    /// Queue a frame for the socket.
    ///
    /// Under `BufferUntilOpen` frames are also accepted while a reconnect is
    /// scheduled; they go out once the next connection opens.
    ///
    /// # Errors
    ///
    /// - `NotConnected` if the send policy rejects the current state
    /// - `SendQueueFull` if the outbound queue is at capacity
    /// - `Codec` if the frame cannot be encoded
    pub fn send(&self, frame: &OutboundFrame) -> Result<(), ConnectionError> {
        let state = self.state();
        let accepted = match self.inner.config.send_policy {
            SendPolicy::BufferUntilOpen => match state {
                ConnectionState::Connecting | ConnectionState::Open => true,
                ConnectionState::Closed | ConnectionState::Error => self.reconnect_pending(),
                ConnectionState::Closing => false,
            },
            SendPolicy::FailFast => state.is_open(),
        };
        if !accepted {
            return Err(ConnectionError::NotConnected { state });
        }

        let text = self.inner.codec.encode(frame)?;
        self.inner.outbound_tx.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => {
                metrics::record_frames_dropped(DropReason::QueueFull, 1);
                tracing::warn!("Outbound queue full, frame rejected");
                ConnectionError::SendQueueFull
            }
            TrySendError::Closed(_) => ConnectionError::NotConnected { state },
        })
    }

    /// Whether a driver is alive between connections, waiting to reconnect.
    #[must_use]
    pub fn reconnect_pending(&self) -> bool {
        matches!(self.state(), ConnectionState::Closed | ConnectionState::Error)
            && self.inner.driver.lock().is_some()
    }

    /// Register a listener for every connection event.
    pub fn subscribe<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.inner.dispatcher.subscribe(listener)
    }

    /// Wait until the connection is open.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` with the state at expiry if the socket did not
    /// open within `timeout`.
    pub async fn wait_until_open(&self, timeout: Duration) -> Result<(), ConnectionError> {
        let mut state_rx = self.inner.state_tx.subscribe();
        let opened = matches!(
            tokio::time::timeout(timeout, state_rx.wait_for(|state| state.is_open())).await,
            Ok(Ok(_))
        );

        if opened {
            Ok(())
        } else {
            Err(ConnectionError::NotConnected {
                state: self.state(),
            })
        }
    }

    /// Start the connection and, under `FailFast`, wait for it to open.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` if `FailFast` is active and the socket did not
    /// open within `timeout`.
    pub async fn ensure_connected(&self, timeout: Duration) -> Result<(), ConnectionError> {
        self.connect();
        match self.send_policy() {
            SendPolicy::BufferUntilOpen => Ok(()),
            SendPolicy::FailFast => self.wait_until_open(timeout).await,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Whether the socket is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Watch lifecycle changes.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.dispatcher.listener_count()
    }

    /// Active send policy.
    #[must_use]
    pub fn send_policy(&self) -> SendPolicy {
        self.inner.config.send_policy
    }

    /// Endpoint this manager connects to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.config.url
    }

    /// A handle that does not keep the manager alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakConnectionManager {
        WeakConnectionManager {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Non-owning [`ConnectionManager`] handle, for listeners that need to send.
#[derive(Clone, Debug)]
pub struct WeakConnectionManager {
    inner: Weak<Inner>,
}

impl WeakConnectionManager {
    /// Recover a strong handle if the manager is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<ConnectionManager> {
        self.inner.upgrade().map(|inner| ConnectionManager { inner })
    }
}

// =============================================================================
// Driver
// =============================================================================

impl Inner {
    async fn run_driver(self: Arc<Self>, driver_id: u64, cancel: CancellationToken) {
        let mut outbound = self.outbound_rx.lock().await;
        let mut policy = self.config.reconnect.clone().map(ReconnectPolicy::new);

        loop {
            let end = self
                .run_connection(&mut outbound, &cancel, policy.as_mut())
                .await;
            discard_queued(&mut outbound);

            let reason = match end {
                SessionEnd::Requested => break,
                SessionEnd::Lost(reason) => reason,
            };

            let Some(delay) = policy.as_mut().and_then(ReconnectPolicy::next_delay) else {
                self.release_driver(driver_id);
                // Frames accepted before the slot was released.
                discard_queued(&mut outbound);
                tracing::info!(reason = %reason, "Venue connection closed, not reconnecting");
                self.dispatch(&ConnectionEvent::Close {
                    reason,
                    kind: CloseKind::Final,
                });
                break;
            };

            metrics::record_reconnect_attempt();
            tracing::warn!(
                reason = %reason,
                delay_ms = delay.as_millis(),
                attempt = policy.as_ref().map_or(0, ReconnectPolicy::attempt_count),
                "Venue connection lost, reconnecting"
            );
            self.dispatch(&ConnectionEvent::Close {
                reason,
                kind: CloseKind::Reconnecting,
            });

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::info!("Connection closed during reconnect delay");
                    self.dispatch(&ConnectionEvent::Close {
                        reason: CLIENT_CLOSE_REASON.to_string(),
                        kind: CloseKind::Requested,
                    });
                    break;
                }
                () = tokio::time::sleep(delay) => {}
            }

            if !self.transition(ConnectionState::Connecting) {
                break;
            }
        }
    }

    async fn run_connection(
        &self,
        outbound: &mut mpsc::Receiver<String>,
        cancel: &CancellationToken,
        policy: Option<&mut ReconnectPolicy>,
    ) -> SessionEnd {
        let url = self.config.url.as_str();
        let connect_timeout = self.config.connect_timeout;
        tracing::info!(url = %url, "Connecting to venue");

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                self.transition(ConnectionState::Closing);
                self.transition(ConnectionState::Closed);
                self.dispatch(&ConnectionEvent::Close {
                    reason: CLIENT_CLOSE_REASON.to_string(),
                    kind: CloseKind::Requested,
                });
                return SessionEnd::Requested;
            }
            result = tokio::time::timeout(connect_timeout, self.transport.open(url)) => {
                result.unwrap_or(Err(TransportError::ConnectTimeout(connect_timeout)))
            }
        };

        let link = match opened {
            Ok(link) => link,
            Err(e) => return self.fail(e),
        };

        if let Some(policy) = policy {
            policy.reset();
        }
        self.transition(ConnectionState::Open);
        tracing::info!("Venue connection open");
        self.dispatch(&ConnectionEvent::Open);

        self.run_session(link, outbound, cancel).await
    }

    async fn run_session(
        &self,
        link: TransportLink,
        outbound: &mut mpsc::Receiver<String>,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        let TransportLink {
            mut sink,
            mut stream,
        } = link;
        let mut heartbeat = self.config.heartbeat.map(Heartbeat::start);

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    self.transition(ConnectionState::Closing);
                    let close = WireMessage::Close {
                        code: Some(NORMAL_CLOSURE),
                        reason: CLIENT_CLOSE_REASON.to_string(),
                    };
                    if let Err(e) = sink.send(close).await {
                        tracing::debug!(error = %e, "Close frame not delivered");
                    }
                    if let Err(e) = sink.close().await {
                        tracing::debug!(error = %e, "Transport close failed");
                    }
                    self.transition(ConnectionState::Closed);
                    tracing::info!("Venue connection closed by client");
                    self.dispatch(&ConnectionEvent::Close {
                        reason: CLIENT_CLOSE_REASON.to_string(),
                        kind: CloseKind::Requested,
                    });
                    return SessionEnd::Requested;
                }

                inbound = stream.next() => match inbound {
                    Some(Ok(WireMessage::Text(text))) => {
                        self.handle_inbound(heartbeat.as_mut(), self.codec.decode(&text));
                    }
                    Some(Ok(WireMessage::Binary(data))) => {
                        self.handle_inbound(heartbeat.as_mut(), self.codec.decode_binary(&data));
                    }
                    Some(Ok(WireMessage::Close { code, reason })) => {
                        tracing::info!(code = ?code, reason = %reason, "Venue sent close frame");
                        self.transition(ConnectionState::Closing);
                        self.transition(ConnectionState::Closed);
                        let reason = if reason.is_empty() {
                            "closed by venue".to_string()
                        } else {
                            reason
                        };
                        return SessionEnd::Lost(reason);
                    }
                    Some(Err(e)) => return self.fail(e),
                    None => {
                        tracing::info!("Venue stream ended without a close frame");
                        return self.fail(TransportError::Closed);
                    }
                },

                Some(text) = outbound.recv() => {
                    if let Err(e) = sink.send(WireMessage::Text(text)).await {
                        return self.fail(e);
                    }
                    metrics::record_frame_sent();
                }

                action = heartbeat::next_tick(heartbeat.as_mut()) => match action {
                    HeartbeatAction::SendPing => {
                        let ping = match self.codec.encode(&heartbeat::ping_frame()) {
                            Ok(ping) => ping,
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to encode keep-alive ping");
                                continue;
                            }
                        };
                        tracing::trace!("Sending keep-alive ping");
                        if let Err(e) = sink.send(WireMessage::Text(ping)).await {
                            return self.fail(e);
                        }
                        metrics::record_frame_sent();
                    }
                    HeartbeatAction::Timeout(elapsed) => {
                        return self.fail(TransportError::HeartbeatTimeout(elapsed));
                    }
                },
            }
        }
    }

    fn handle_inbound(
        &self,
        heartbeat: Option<&mut Heartbeat>,
        decoded: Result<InboundFrame, CodecError>,
    ) {
        if let Some(heartbeat) = heartbeat {
            heartbeat.record_inbound();
        }

        match decoded {
            Ok(frame) => {
                metrics::record_frame_received();
                tracing::debug!(msg_type = ?frame.msg_type(), "Frame received");
                self.dispatch(&ConnectionEvent::Message(frame));
            }
            Err(e) => {
                metrics::record_frame_malformed();
                tracing::warn!(error = %e, "Dropping malformed frame");
            }
        }
    }

    fn fail(&self, error: TransportError) -> SessionEnd {
        tracing::warn!(error = %error, "Venue connection error");
        self.transition(ConnectionState::Error);
        self.dispatch(&ConnectionEvent::Error(error.clone()));
        self.transition(ConnectionState::Closed);
        SessionEnd::Lost(error.to_string())
    }

    fn dispatch(&self, event: &ConnectionEvent) {
        let report = self.dispatcher.dispatch(event);
        tracing::trace!(
            event = event.kind(),
            delivered = report.delivered,
            failed = report.failed,
            "Event dispatched"
        );
    }

    fn transition(&self, next: ConnectionState) -> bool {
        let mut previous = None;
        let changed = self.state_tx.send_if_modified(|state| {
            if state.can_transition_to(next) {
                previous = Some(*state);
                *state = next;
                true
            } else {
                false
            }
        });

        if let Some(from) = previous {
            metrics::set_connection_state(next);
            tracing::debug!(from = %from, to = %next, "Connection state changed");
        } else {
            let current = *self.state_tx.borrow();
            tracing::warn!(from = %current, to = %next, "Rejected invalid state transition");
        }
        changed
    }

    fn release_driver(&self, driver_id: u64) {
        let mut slot = self.driver.lock();
        if slot.as_ref().is_some_and(|driver| driver.id == driver_id) {
            *slot = None;
        }
    }
}

fn discard_queued(outbound: &mut mpsc::Receiver<String>) {
    let mut dropped = 0_u64;
    while outbound.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        metrics::record_frames_dropped(DropReason::ConnectionClosed, dropped);
        tracing::warn!(dropped, "Discarded frames queued for a closed connection");
    }
}
