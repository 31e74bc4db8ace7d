//! Prometheus Metrics Module
//!
//! Counters and gauges for the venue connection.
//!
//! # Metrics Categories
//!
//! - **Frames**: received, sent, malformed and dropped frames
//! - **Connection**: lifecycle state and reconnect attempts
//! - **Listeners**: registered listener count and listener panics
//! - **Requests**: correlated request latency by outcome
//!
//! Recording is a no-op until a recorder is installed, so the library can be
//! used without [`init_metrics`].

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::event::ConnectionState;

// =============================================================================
// Exporter
// =============================================================================

static EXPORTER_ADDR: OnceLock<SocketAddr> = OnceLock::new();

/// Install the Prometheus recorder and serve `/metrics` on `port`.
///
/// Calling it again after a successful install is a no-op. Must be called
/// within a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or a recorder is already
/// installed.
pub fn init_metrics(port: u16) -> Result<SocketAddr, BuildError> {
    if let Some(addr) = EXPORTER_ADDR.get() {
        return Ok(*addr);
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();

    Ok(*EXPORTER_ADDR.get_or_init(|| addr))
}

/// Address of the running exporter, if installed.
#[must_use]
pub fn exporter_addr() -> Option<SocketAddr> {
    EXPORTER_ADDR.get().copied()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Frames
    describe_counter!(
        "venue_stream_frames_received_total",
        "Well-formed frames received from the venue"
    );
    describe_counter!(
        "venue_stream_frames_sent_total",
        "Frames written to the venue socket"
    );
    describe_counter!(
        "venue_stream_frames_malformed_total",
        "Inbound frames dropped because they were not a JSON object"
    );
    describe_counter!(
        "venue_stream_frames_dropped_total",
        "Outbound frames rejected or discarded before reaching the socket"
    );

    // Connection
    describe_gauge!(
        "venue_stream_connection_state",
        "Connection state (0=closed 1=connecting 2=open 3=closing 4=error)"
    );
    describe_counter!(
        "venue_stream_reconnect_attempts_total",
        "Reconnect attempts after a lost connection"
    );

    // Listeners
    describe_gauge!("venue_stream_listeners", "Registered event listeners");
    describe_counter!(
        "venue_stream_listener_panics_total",
        "Listener callbacks that panicked during dispatch"
    );

    // Requests
    describe_histogram!(
        "venue_stream_request_duration_seconds",
        "Correlated request latency by outcome"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why an outbound frame never reached the socket.
#[derive(Debug, Clone, Copy)]
pub enum DropReason {
    /// The outbound queue was full.
    QueueFull,
    /// The connection ended with the frame still queued.
    ConnectionClosed,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::ConnectionClosed => "connection_closed",
        }
    }
}

/// Final state of a correlated request.
#[derive(Debug, Clone, Copy)]
pub enum RequestOutcome {
    /// Matched response.
    Ok,
    /// Venue returned an error object.
    ApiError,
    /// No response in time.
    Timeout,
    /// The connection failed or closed first.
    Failed,
}

impl RequestOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::ApiError => "api_error",
            Self::Timeout => "timeout",
            Self::Failed => "failed",
        }
    }
}

/// Record a well-formed inbound frame.
pub fn record_frame_received() {
    counter!("venue_stream_frames_received_total").increment(1);
}

/// Record a frame written to the socket.
pub fn record_frame_sent() {
    counter!("venue_stream_frames_sent_total").increment(1);
}

/// Record a malformed inbound frame.
pub fn record_frame_malformed() {
    counter!("venue_stream_frames_malformed_total").increment(1);
}

/// Record outbound frames that never reached the socket.
pub fn record_frames_dropped(reason: DropReason, count: u64) {
    counter!(
        "venue_stream_frames_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(count);
}

/// Record a listener panic.
pub fn record_listener_panic() {
    counter!("venue_stream_listener_panics_total").increment(1);
}

/// Record a reconnect attempt.
pub fn record_reconnect_attempt() {
    counter!("venue_stream_reconnect_attempts_total").increment(1);
}

/// Update the registered listener count.
#[allow(clippy::cast_precision_loss)]
pub fn set_listener_count(count: usize) {
    gauge!("venue_stream_listeners").set(count as f64);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("venue_stream_connection_state").set(state.as_gauge());
}

/// Record how long a correlated request took.
pub fn record_request_duration(outcome: RequestOutcome, duration: Duration) {
    histogram!(
        "venue_stream_request_duration_seconds",
        "outcome" => outcome.as_str()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
