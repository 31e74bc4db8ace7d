//! Request Correlator
//!
//! Turns the one-way fan-out into request/response calls. Each request
//! registers a temporary listener, sends its payload and resolves on the
//! first frame its predicate accepts. The listener is removed on every exit
//! path, including when the caller drops the future.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::domain::event::{ConnectionEvent, TransportError};
use crate::domain::frame::{ApiError, InboundFrame, OutboundFrame, PassthroughTag};
use crate::infrastructure::connection::{ConnectionError, ConnectionManager, ListenerGuard, ListenerHandle};
use crate::infrastructure::metrics::{self, RequestOutcome};

/// Request failures.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The request could not be sent.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The connection failed while the request was outstanding.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// The connection closed while the request was outstanding.
    #[error("connection closed before a response arrived")]
    ConnectionClosed,

    /// No matching frame arrived in time.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The venue answered with an error object.
    #[error("venue error {code}: {message}")]
    Api {
        /// Venue error code.
        code: String,
        /// Venue error message.
        message: String,
    },

    /// The response did not have the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl From<ApiError> for RequestError {
    fn from(error: ApiError) -> Self {
        Self::Api {
            code: error.code,
            message: error.message,
        }
    }
}

impl RequestError {
    const fn outcome(&self) -> RequestOutcome {
        match self {
            Self::Api { .. } => RequestOutcome::ApiError,
            Self::Timeout(_) => RequestOutcome::Timeout,
            _ => RequestOutcome::Failed,
        }
    }
}

type Reply = Result<InboundFrame, RequestError>;

/// Request/response over the shared connection.
#[derive(Debug, Clone)]
pub struct RequestCorrelator {
    connection: ConnectionManager,
    default_timeout: Duration,
}

impl RequestCorrelator {
    /// Create a correlator.
    #[must_use]
    pub const fn new(connection: ConnectionManager, default_timeout: Duration) -> Self {
        Self {
            connection,
            default_timeout,
        }
    }

    /// Timeout used by callers that do not pick their own.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// The underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Send `payload` and resolve with the first frame `predicate` accepts.
    ///
    /// # Errors
    ///
    /// - `Connection` if the payload could not be sent
    /// - `Transport` / `ConnectionClosed` if the connection failed or closed first
    /// - `Timeout` if nothing matched within `timeout`, including the wait
    ///   for the socket to open under `FailFast`
    pub async fn request<P>(
        &self,
        payload: &OutboundFrame,
        predicate: P,
        timeout: Duration,
    ) -> Result<InboundFrame, RequestError>
    where
        P: Fn(&InboundFrame) -> bool + Send + Sync + 'static,
    {
        timed(self.correlate(payload, predicate, timeout)).await
    }

    /// Tag `payload` with a fresh passthrough and resolve with the frame that
    /// echoes it.
    ///
    /// # Errors
    ///
    /// As [`request`](Self::request), plus `Api` when the matched frame
    /// carries a venue error.
    pub async fn request_tagged(
        &self,
        mut payload: OutboundFrame,
        timeout: Duration,
    ) -> Result<InboundFrame, RequestError> {
        let tag = PassthroughTag::generate();
        payload.set_passthrough(&tag);

        timed(async {
            let frame = self
                .correlate(&payload, move |frame| tag.matches(frame), timeout)
                .await?;
            match frame.error() {
                Some(error) => Err(error.into()),
                None => Ok(frame),
            }
        })
        .await
    }

    async fn correlate<P>(
        &self,
        payload: &OutboundFrame,
        predicate: P,
        timeout: Duration,
    ) -> Result<InboundFrame, RequestError>
    where
        P: Fn(&InboundFrame) -> bool + Send + Sync + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel::<Reply>();
        let reply_tx = Mutex::new(Some(reply_tx));
        let own_handle: Arc<OnceLock<ListenerHandle>> = Arc::new(OnceLock::new());

        let listener_handle = Arc::clone(&own_handle);
        let handle = self.connection.subscribe(move |event| {
            let reply = match event {
                ConnectionEvent::Message(frame) if predicate(frame) => Ok(frame.clone()),
                ConnectionEvent::Message(_) | ConnectionEvent::Open => return,
                ConnectionEvent::Error(error) => Err(RequestError::Transport(error.clone())),
                ConnectionEvent::Close { .. } => Err(RequestError::ConnectionClosed),
            };

            if let Some(tx) = reply_tx.lock().take() {
                // The caller may already have given up.
                let _ = tx.send(reply);
            }
            if let Some(handle) = listener_handle.get() {
                handle.unsubscribe();
            }
        });
        let _ = own_handle.set(handle.clone());
        let _guard = ListenerGuard::new(handle);

        // Waiting for the open and waiting for the reply share one budget.
        let exchange = async {
            self.connection
                .ensure_connected(timeout)
                .await
                .map_err(|_| RequestError::Timeout(timeout))?;
            self.connection.send(payload)?;
            reply_rx
                .await
                .unwrap_or(Err(RequestError::ConnectionClosed))
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .unwrap_or(Err(RequestError::Timeout(timeout)))
    }
}

async fn timed<F>(request: F) -> Result<InboundFrame, RequestError>
where
    F: Future<Output = Result<InboundFrame, RequestError>>,
{
    let started = Instant::now();
    let result = request.await;

    let outcome = result.as_ref().map_or_else(RequestError::outcome, |_| RequestOutcome::Ok);
    metrics::record_request_duration(outcome, started.elapsed());
    if let Err(e) = &result {
        tracing::debug!(error = %e, elapsed_ms = started.elapsed().as_millis(), "Request failed");
    }
    result
}
