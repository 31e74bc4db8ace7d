//! Frame Codec
//!
//! JSON encoding and decoding for venue frames. Every inbound frame must be
//! a single JSON object; anything else is a `MalformedFrame`.

use crate::domain::frame::{InboundFrame, OutboundFrame};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Inbound data was not a JSON object.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// JSON encoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

/// JSON codec for the venue stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::MalformedFrame` if the text is not a JSON object.
    pub fn decode(&self, text: &str) -> Result<InboundFrame, CodecError> {
        let value: serde_json::Value = serde_json::from_str(text.trim())
            .map_err(|e| CodecError::MalformedFrame(format!("{e}: {}", preview(text))))?;

        InboundFrame::from_value(value).ok_or_else(|| {
            CodecError::MalformedFrame(format!("expected JSON object, got: {}", preview(text)))
        })
    }

    /// Decode a binary frame carrying UTF-8 JSON.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::MalformedFrame` for non-UTF-8 data or non-object JSON.
    pub fn decode_binary(&self, data: &[u8]) -> Result<InboundFrame, CodecError> {
        let text = std::str::from_utf8(data).map_err(|_| {
            CodecError::MalformedFrame(format!("non-UTF8 binary frame ({} bytes)", data.len()))
        })?;
        self.decode(text)
    }

    /// Encode an outbound frame.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, frame: &OutboundFrame) -> Result<String, CodecError> {
        Ok(serde_json::to_string(frame)?)
    }
}

fn preview(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(50)
        .map_or(text.len(), |(idx, _)| idx);
    &text[..end]
}
