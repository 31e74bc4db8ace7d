//! Application Layer - Use cases and port definitions.
//!
//! The correlator, feed subscriptions and the market data service are built
//! on the Connection Manager; the transport port keeps it independent of the
//! socket implementation.

/// Port interfaces for external systems (the socket transport).
pub mod ports;

/// Request correlation, feed subscriptions and market data helpers.
pub mod services;
