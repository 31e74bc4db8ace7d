//! WebSocket Transport
//!
//! [`Transport`] adapter over `tokio-tungstenite`. Ping/pong control frames
//! are answered by tungstenite itself and filtered out here; the keep-alive
//! the venue cares about is the application-level ping.

use async_trait::async_trait;
use futures::future;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::application::ports::{Transport, TransportLink, WireMessage};
use crate::domain::event::TransportError;

/// Secure WebSocket transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteTransport;

impl TungsteniteTransport {
    /// Create a transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn open(&self, url: &str) -> Result<TransportLink, TransportError> {
        let (ws_stream, response) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        tracing::debug!(status = %response.status(), "WebSocket handshake complete");

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| TransportError::WebSocket(e.to_string()))
            .with(|message: WireMessage| future::ready(Ok::<_, TransportError>(to_message(message))));

        let stream = read.filter_map(|item| {
            future::ready(match item {
                Ok(message) => from_message(message).map(Ok),
                Err(e) => Some(Err(TransportError::WebSocket(e.to_string()))),
            })
        });

        Ok(TransportLink {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

fn to_message(message: WireMessage) -> Message {
    match message {
        WireMessage::Text(text) => Message::Text(text.into()),
        WireMessage::Binary(data) => Message::Binary(data.into()),
        WireMessage::Close { code, reason } => Message::Close(Some(CloseFrame {
            code: code.map_or(CloseCode::Normal, CloseCode::from),
            reason: reason.into(),
        })),
    }
}

fn from_message(message: Message) -> Option<WireMessage> {
    match message {
        Message::Text(text) => Some(WireMessage::Text(text.as_str().to_owned())),
        Message::Binary(data) => Some(WireMessage::Binary(data.to_vec())),
        Message::Close(frame) => Some(frame.map_or_else(
            || WireMessage::Close {
                code: None,
                reason: String::new(),
            },
            |frame| WireMessage::Close {
                code: Some(u16::from(frame.code)),
                reason: frame.reason.as_str().to_owned(),
            },
        )),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
    }
}
