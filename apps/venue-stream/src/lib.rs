#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Venue Stream - Multiplexed Market Data Client
//!
//! Maintains a single WebSocket connection to the trading venue and
//! multiplexes correlated request/response calls and long-lived feeds over
//! it.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Wire frames, connection events and market data types
//!   - `frame`: Outbound/inbound frames and passthrough tags
//!   - `event`: Connection states and dispatched events
//!   - `market`: Active symbols, exchange rates, ticks
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: The socket transport interface
//!   - `services`: Request correlator, feed subscriptions, market data
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `connection`: Connection Manager, dispatcher, codec, keep-alive, reconnect
//!   - `websocket`: `tokio-tungstenite` transport
//!   - `config`: Environment configuration
//!   - `metrics` / `telemetry`: Prometheus metrics, logging and tracing
//!
//! # Data Flow
//!
//! ```text
//!                    ┌──────────────────┐  send   ┌───────────┐
//! Correlator ───────►│                  │────────►│           │
//! Feed Subscriptions │ Connection       │         │ Venue WS  │
//!        ▲           │ Manager (driver) │◄────────│           │
//!        │           └────────┬─────────┘ frames  └───────────┘
//!        │                    ▼
//!        └───────────── Dispatcher ──► Listener 1..N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Frames, events and market data with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::event::{CloseKind, ConnectionEvent, ConnectionState, TransportError};
pub use domain::frame::{ApiError, InboundFrame, OutboundFrame, PassthroughTag};
pub use domain::market::{
    ActiveSymbol, ActiveSymbolsRequest, ExchangeRates, ProductType, SymbolsDetail, Tick,
};

// Ports
pub use application::ports::{FrameSink, FrameStream, Transport, TransportLink, WireMessage};

// Services
pub use application::services::{
    FeedError, FeedSubscription, MarketDataService, RequestCorrelator, RequestError,
    subscribe_to_feed,
};

// Connection
pub use infrastructure::connection::{
    ConnectionConfig, ConnectionError, ConnectionManager, DispatchReport, ListenerHandle,
    ListenerId, WeakConnectionManager,
};

// Infrastructure config
pub use infrastructure::config::{ClientConfig, ConfigError, SendPolicy, WebSocketSettings};

// Transport
pub use infrastructure::websocket::TungsteniteTransport;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{
    TelemetryConfig, TelemetryError, TelemetryGuard, init as init_telemetry,
};
