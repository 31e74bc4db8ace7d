//! Infrastructure Layer - Adapters and external integrations.
//!
//! The Connection Manager and its socket adapter, plus the ambient
//! configuration, logging and metrics plumbing.

/// Connection Manager, dispatcher, codec, keep-alive and reconnect policy.
pub mod connection;

/// Configuration loaded from the environment.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;

/// `tokio-tungstenite` transport adapter.
pub mod websocket;
