//! Connection Lifecycle and Events
//!
//! ```text
//! Closed ──► Connecting ──► Open ──► Closing ──► Closed
//!                │            │
//!                └──► Error ◄─┘──► Closed
//! ```
//!
//! `Connecting → Closing` covers a `close()` that interrupts an in-flight
//! open.

use std::fmt;
use std::time::Duration;

use super::frame::InboundFrame;

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of the physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No socket.
    #[default]
    Closed,
    /// Transport open in flight.
    Connecting,
    /// Socket open, frames flow.
    Open,
    /// Close handshake in progress.
    Closing,
    /// Transport failure; always followed by `Closed`.
    Error,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Closed, Self::Connecting)
                | (Self::Connecting, Self::Open | Self::Error | Self::Closing)
                | (Self::Open, Self::Closing | Self::Error)
                | (Self::Closing | Self::Error, Self::Closed)
        )
    }

    /// Whether frames can be written right now.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Error => "error",
        }
    }

    /// Numeric encoding for the connection state gauge.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::Connecting => 1.0,
            Self::Open => 2.0,
            Self::Closing => 3.0,
            Self::Error => 4.0,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Transport Error
// =============================================================================

/// Socket-level failure. Broadcast to every listener.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Opening the socket failed.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// Opening the socket did not finish in time.
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Read or write on an open socket failed.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The socket ended without a close frame.
    #[error("connection closed")]
    Closed,

    /// No inbound traffic after a keep-alive ping.
    #[error("heartbeat timeout after {0:?}")]
    HeartbeatTimeout(Duration),
}

// =============================================================================
// Connection Events
// =============================================================================

/// Why a connection ended, from the listener's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// `close()` was called.
    Requested,
    /// Lost; a reconnect attempt is scheduled.
    Reconnecting,
    /// Lost and no reconnect will follow.
    Final,
}

/// Notification fanned out to every registered listener.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The socket opened.
    Open,
    /// A well-formed inbound frame.
    Message(InboundFrame),
    /// A transport-level failure.
    Error(TransportError),
    /// The socket closed.
    Close {
        /// Human readable reason.
        reason: String,
        /// What happens next.
        kind: CloseKind,
    },
}

impl ConnectionEvent {
    /// Stable label used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Message(_) => "message",
            Self::Error(_) => "error",
            Self::Close { .. } => "close",
        }
    }

    /// The frame carried by a `Message` event.
    #[must_use]
    pub const fn frame(&self) -> Option<&InboundFrame> {
        match self {
            Self::Message(frame) => Some(frame),
            _ => None,
        }
    }
}
