//! Feed Subscriptions
//!
//! A long-lived logical subscription on the shared connection. Every frame
//! the predicate accepts is handed to `on_update`; connection trouble is
//! reported through `on_error`.
//!
//! After a reconnect the original payload is sent again, so the venue-side
//! stream resumes without caller involvement. Unsubscribing sends a
//! best-effort `forget` for the venue-side stream id.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::domain::event::{CloseKind, ConnectionEvent, TransportError};
use crate::domain::frame::{ApiError, InboundFrame, OutboundFrame};
use crate::domain::market::forget_frame;
use crate::infrastructure::connection::{
    ConnectionError, ConnectionManager, ListenerHandle, WeakConnectionManager,
};

/// Errors delivered to a feed's `on_error` callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// The connection reported a transport failure.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// The connection dropped; the feed resumes after the reconnect.
    #[error("feed interrupted: {reason}")]
    Interrupted {
        /// Close reason.
        reason: String,
    },

    /// The connection closed and will not come back on its own.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Close reason.
        reason: String,
    },

    /// The venue rejected the subscription or an update.
    #[error("venue error {code}: {message}")]
    Api {
        /// Venue error code.
        code: String,
        /// Venue error message.
        message: String,
    },

    /// An update did not have the expected shape.
    #[error("failed to decode update: {0}")]
    Decode(String),
}

impl From<ApiError> for FeedError {
    fn from(error: ApiError) -> Self {
        Self::Api {
            code: error.code,
            message: error.message,
        }
    }
}

#[derive(Default)]
struct FeedState {
    subscription_id: Mutex<Option<String>>,
    needs_resend: AtomicBool,
    closed: AtomicBool,
}

/// Handle to a running feed. Dropping it unsubscribes.
#[must_use = "dropping a FeedSubscription unsubscribes it"]
pub struct FeedSubscription {
    handle: ListenerHandle,
    connection: WeakConnectionManager,
    state: Arc<FeedState>,
}

impl fmt::Debug for FeedSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedSubscription")
            .field("listener", &self.handle.id())
            .field("subscription_id", &self.subscription_id())
            .field("active", &self.is_active())
            .finish()
    }
}

impl FeedSubscription {
    /// Stop the feed. Returns `false` if it was already stopped.
    ///
    /// When the venue reported a stream id and the socket is open, a
    /// `forget` frame is sent for it.
    pub fn unsubscribe(&self) -> bool {
        let removed = self.handle.unsubscribe();
        self.state.closed.store(true, Ordering::SeqCst);
        if !removed {
            return false;
        }

        let stream_id = self.state.subscription_id.lock().take();
        if let (Some(id), Some(connection)) = (stream_id, self.connection.upgrade())
            && connection.is_open()
        {
            match connection.send(&forget_frame(&id)) {
                Ok(()) => tracing::debug!(subscription_id = %id, "Forget sent"),
                Err(e) => tracing::debug!(subscription_id = %id, error = %e, "Forget not sent"),
            }
        }
        true
    }

    /// Whether updates are still being delivered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.state.closed.load(Ordering::SeqCst) && self.handle.is_active()
    }

    /// Venue-side stream id, once the first update arrived.
    #[must_use]
    pub fn subscription_id(&self) -> Option<String> {
        self.state.subscription_id.lock().clone()
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Start a feed.
///
/// Registers the listener, starts the connection if needed and sends
/// `payload`. If the current state does not accept frames yet, the payload
/// goes out when the connection opens.
///
/// # Errors
///
/// Returns an error if the payload cannot be encoded or the outbound queue
/// is full.
pub fn subscribe_to_feed<P, U, E>(
    connection: &ConnectionManager,
    payload: OutboundFrame,
    predicate: P,
    on_update: U,
    on_error: E,
) -> Result<FeedSubscription, ConnectionError>
where
    P: Fn(&InboundFrame) -> bool + Send + Sync + 'static,
    U: Fn(&InboundFrame) + Send + Sync + 'static,
    E: Fn(FeedError) + Send + Sync + 'static,
{
    let state = Arc::new(FeedState::default());
    let own_handle: Arc<OnceLock<ListenerHandle>> = Arc::new(OnceLock::new());
    let payload = Arc::new(payload);

    let listener = {
        let state = Arc::clone(&state);
        let own_handle = Arc::clone(&own_handle);
        let payload = Arc::clone(&payload);
        let weak = connection.downgrade();

        move |event: &ConnectionEvent| match event {
            ConnectionEvent::Open => {
                if state.needs_resend.swap(false, Ordering::SeqCst) {
                    resend(&weak, &payload, &state);
                }
            }
            ConnectionEvent::Message(frame) if predicate(frame) => {
                if let Some(id) = frame.subscription_id() {
                    *state.subscription_id.lock() = Some(id.to_string());
                }
                match frame.error() {
                    Some(error) => on_error(error.into()),
                    None => on_update(frame),
                }
            }
            ConnectionEvent::Message(_) => {}
            ConnectionEvent::Error(error) => on_error(FeedError::Transport(error.clone())),
            ConnectionEvent::Close { reason, kind } => {
                // The venue forgets every stream with the socket.
                state.subscription_id.lock().take();
                match kind {
                    CloseKind::Reconnecting => {
                        state.needs_resend.store(true, Ordering::SeqCst);
                        on_error(FeedError::Interrupted {
                            reason: reason.clone(),
                        });
                    }
                    CloseKind::Requested => {
                        state.needs_resend.store(true, Ordering::SeqCst);
                        on_error(FeedError::ConnectionClosed {
                            reason: reason.clone(),
                        });
                    }
                    CloseKind::Final => {
                        state.closed.store(true, Ordering::SeqCst);
                        if let Some(handle) = own_handle.get() {
                            handle.unsubscribe();
                        }
                        on_error(FeedError::ConnectionClosed {
                            reason: reason.clone(),
                        });
                    }
                }
            }
        }
    };

    let handle = connection.subscribe(listener);
    let _ = own_handle.set(handle.clone());
    let subscription = FeedSubscription {
        handle,
        connection: connection.downgrade(),
        state: Arc::clone(&state),
    };

    connection.connect();
    match connection.send(&payload) {
        Ok(()) => {}
        Err(ConnectionError::NotConnected { state: current }) => {
            tracing::debug!(state = %current, "Feed request deferred until the connection opens");
            state.needs_resend.store(true, Ordering::SeqCst);
            // The open may have been dispatched in between.
            if connection.is_open() && state.needs_resend.swap(false, Ordering::SeqCst) {
                connection.send(&payload)?;
            }
        }
        Err(e) => return Err(e),
    }

    Ok(subscription)
}

fn resend(weak: &WeakConnectionManager, payload: &OutboundFrame, state: &FeedState) {
    let Some(connection) = weak.upgrade() else {
        return;
    };
    match connection.send(payload) {
        Ok(()) => tracing::debug!("Feed request re-sent after reconnect"),
        Err(e) => {
            state.needs_resend.store(true, Ordering::SeqCst);
            tracing::warn!(error = %e, "Failed to re-send feed request");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_converts() {
        let error: FeedError = ApiError {
            code: "MarketIsClosed".to_string(),
            message: "closed".to_string(),
        }
        .into();
        assert_eq!(
            error,
            FeedError::Api {
                code: "MarketIsClosed".to_string(),
                message: "closed".to_string(),
            }
        );
    }

    #[test]
    fn interrupted_message_names_reason() {
        let error = FeedError::Interrupted {
            reason: "stream ended".to_string(),
        };
        assert_eq!(error.to_string(), "feed interrupted: stream ended");
    }
}
