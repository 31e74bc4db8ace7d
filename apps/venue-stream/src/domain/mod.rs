//! Domain Layer - Frames, connection events and market data types.
//!
//! Pure types with serialization support. Nothing here touches the socket.

/// Outbound/inbound wire frames and passthrough correlation tags.
pub mod frame;

/// Connection lifecycle states and dispatched events.
pub mod event;

/// Typed market data views (active symbols, exchange rates, ticks).
pub mod market;
