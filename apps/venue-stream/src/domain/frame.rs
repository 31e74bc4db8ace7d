//! Venue Wire Frames
//!
//! Every message on the socket is a single JSON object.
//!
//! # Outbound
//!
//! Top-level keys name the requested operation:
//!
//! ```json
//! {"active_symbols": "brief", "product_type": "basic", "passthrough": {"req_id": "..."}}
//! ```
//!
//! # Inbound
//!
//! A `msg_type` discriminator plus a payload keyed by that type. The venue
//! echoes `passthrough` untouched, which is what lets a listener recognise
//! its own response on the shared connection:
//!
//! ```json
//! {"msg_type": "ping", "ping": "pong", "passthrough": {"req_id": "..."}, "echo_req": {...}}
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Field carrying the correlation tag.
pub const PASSTHROUGH_KEY: &str = "passthrough";

/// Field carrying the inbound discriminator.
pub const MSG_TYPE_KEY: &str = "msg_type";

const REQUEST_ID_KEY: &str = "req_id";
const HEARTBEAT_KEY: &str = "heartbeat";

// =============================================================================
// Outbound
// =============================================================================

/// A frame to be written to the venue.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct OutboundFrame(Map<String, Value>);

impl OutboundFrame {
    /// Create an empty frame.
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a frame from a JSON value. Returns `None` unless it is an object.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Add a field, builder style.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Add or replace a field.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The passthrough tag, if one was attached.
    #[must_use]
    pub fn passthrough(&self) -> Option<&Value> {
        self.0.get(PASSTHROUGH_KEY)
    }

    /// Attach (or replace) the passthrough tag.
    pub fn set_passthrough(&mut self, tag: &PassthroughTag) {
        self.0
            .insert(PASSTHROUGH_KEY.to_string(), tag.as_value().clone());
    }

    /// Borrow the underlying object.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

// =============================================================================
// Passthrough Tag
// =============================================================================

/// Opaque correlation marker echoed back by the venue.
///
/// Generated tags embed a v4 UUID, so two outstanding requests never share
/// a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassthroughTag(Value);

impl PassthroughTag {
    /// Generate a fresh request tag: `{"req_id": "<uuid>"}`.
    #[must_use]
    pub fn generate() -> Self {
        Self(json!({ REQUEST_ID_KEY: Uuid::new_v4().to_string() }))
    }

    /// Wrap an arbitrary caller-supplied value.
    #[must_use]
    pub const fn new(value: Value) -> Self {
        Self(value)
    }

    /// Tag carried by keep-alive pings.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self(json!({ HEARTBEAT_KEY: true }))
    }

    /// Borrow the tag value.
    #[must_use]
    pub const fn as_value(&self) -> &Value {
        &self.0
    }

    /// Whether `frame` echoes this tag.
    #[must_use]
    pub fn matches(&self, frame: &InboundFrame) -> bool {
        frame.passthrough() == Some(&self.0)
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// Error object returned by the venue inside an otherwise normal frame.
///
/// ```json
/// {"msg_type": "exchange_rates", "error": {"code": "InputValidationFailed", "message": "..."}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Machine readable code.
    pub code: String,
    /// Human readable description.
    pub message: String,
}

/// A parsed frame received from the venue.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame(Map<String, Value>);

impl InboundFrame {
    /// Wrap an already-parsed JSON object.
    #[must_use]
    pub const fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Build a frame from a JSON value. Returns `None` unless it is an object.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// The `msg_type` discriminator.
    #[must_use]
    pub fn msg_type(&self) -> Option<&str> {
        self.0.get(MSG_TYPE_KEY).and_then(Value::as_str)
    }

    /// The echoed passthrough tag.
    #[must_use]
    pub fn passthrough(&self) -> Option<&Value> {
        self.0.get(PASSTHROUGH_KEY)
    }

    /// The original request as echoed by the venue.
    #[must_use]
    pub fn echo_req(&self) -> Option<&Value> {
        self.0.get("echo_req")
    }

    /// Venue-side subscription id for streaming responses.
    #[must_use]
    pub fn subscription_id(&self) -> Option<&str> {
        self.0
            .get("subscription")
            .and_then(|s| s.get("id"))
            .and_then(Value::as_str)
    }

    /// The venue error, if the frame carries one.
    #[must_use]
    pub fn error(&self) -> Option<ApiError> {
        let error = self.0.get("error")?;
        Some(serde_json::from_value(error.clone()).unwrap_or_else(|_| ApiError {
            code: "Unknown".to_string(),
            message: error.to_string(),
        }))
    }

    /// Whether this is the reply to a keep-alive ping.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.passthrough()
            .and_then(|p| p.get(HEARTBEAT_KEY))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The payload keyed by `msg_type`.
    #[must_use]
    pub fn payload(&self) -> Option<&Value> {
        self.msg_type().and_then(|t| self.0.get(t))
    }

    /// Decode the payload keyed by `msg_type` into a typed view.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is missing or does not match `T`.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let payload = self.payload().cloned().unwrap_or(Value::Null);
        serde_json::from_value(payload)
    }

    /// Look up a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Borrow the underlying object.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(value: Value) -> InboundFrame {
        InboundFrame::from_value(value).unwrap()
    }

    #[test]
    fn outbound_builder_sets_fields() {
        let frame = OutboundFrame::new()
            .with("active_symbols", "brief")
            .with("product_type", "basic");
        assert_eq!(frame.get("active_symbols"), Some(&json!("brief")));
        assert_eq!(frame.get("product_type"), Some(&json!("basic")));
        assert!(frame.passthrough().is_none());
    }

    #[test]
    fn outbound_rejects_non_objects() {
        assert!(OutboundFrame::from_value(json!([1, 2])).is_none());
        assert!(OutboundFrame::from_value(json!({"ping": 1})).is_some());
    }

    #[test]
    fn generated_tags_are_unique() {
        let a = PassthroughTag::generate();
        let b = PassthroughTag::generate();
        assert_ne!(a, b);
        assert!(a.as_value().get("req_id").is_some());
    }

    #[test]
    fn tag_matches_echoed_passthrough() {
        let tag = PassthroughTag::generate();
        let mut frame = OutboundFrame::new().with("ping", 1);
        frame.set_passthrough(&tag);

        let reply = inbound(json!({
            "msg_type": "ping",
            "ping": "pong",
            "passthrough": frame.passthrough().cloned().unwrap(),
        }));
        assert!(tag.matches(&reply));
        assert!(!PassthroughTag::generate().matches(&reply));
    }

    #[test]
    fn inbound_accessors() {
        let frame = inbound(json!({
            "msg_type": "exchange_rates",
            "exchange_rates": {"base_currency": "USD", "rates": {"EUR": 0.5}},
            "subscription": {"id": "abc-123"},
            "echo_req": {"exchange_rates": 1},
        }));
        assert_eq!(frame.msg_type(), Some("exchange_rates"));
        assert_eq!(frame.subscription_id(), Some("abc-123"));
        assert_eq!(frame.payload().unwrap()["base_currency"], "USD");
        assert!(frame.echo_req().is_some());
        assert!(frame.error().is_none());
    }

    #[test]
    fn inbound_error_is_extracted() {
        let frame = inbound(json!({
            "msg_type": "ticks",
            "error": {"code": "MarketIsClosed", "message": "This market is presently closed."},
        }));
        let error = frame.error().unwrap();
        assert_eq!(error.code, "MarketIsClosed");
    }

    #[test]
    fn malformed_error_object_still_surfaces() {
        let frame = inbound(json!({"msg_type": "ticks", "error": "boom"}));
        let error = frame.error().unwrap();
        assert_eq!(error.code, "Unknown");
        assert!(error.message.contains("boom"));
    }

    #[test]
    fn heartbeat_replies_are_recognised() {
        let frame = inbound(json!({
            "msg_type": "ping",
            "ping": "pong",
            "passthrough": PassthroughTag::heartbeat().as_value().clone(),
        }));
        assert!(frame.is_heartbeat());
        assert!(!inbound(json!({"msg_type": "ping"})).is_heartbeat());
    }
}
