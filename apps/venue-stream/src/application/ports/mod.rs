//! Port Interfaces
//!
//! The Connection Manager talks to the socket only through [`Transport`].
//! The production adapter is
//! [`TungsteniteTransport`](crate::infrastructure::websocket::TungsteniteTransport);
//! tests plug in an in-memory implementation.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};

use crate::domain::event::TransportError;

/// A message as seen at the transport boundary.
///
/// Ping/pong control frames are handled inside the adapter and never
/// surface here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Close frame.
    Close {
        /// Close code, when the peer sent one.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
}

/// Write half of an open transport.
pub type FrameSink = Pin<Box<dyn Sink<WireMessage, Error = TransportError> + Send>>;

/// Read half of an open transport.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<WireMessage, TransportError>> + Send>>;

/// An open, split transport.
pub struct TransportLink {
    /// Outbound half.
    pub sink: FrameSink,
    /// Inbound half.
    pub stream: FrameStream,
}

impl std::fmt::Debug for TransportLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportLink").finish_non_exhaustive()
    }
}

/// Opens physical connections.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectFailed` if the handshake fails.
    async fn open(&self, url: &str) -> Result<TransportLink, TransportError>;
}
