//! Venue Stream Binary
//!
//! Connects to the venue, logs the active symbol list and streams exchange
//! rates until interrupted.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin venue-stream
//! ```
//!
//! # Environment Variables
//!
//! - `VENUE_WS_URL`: Full WebSocket endpoint (overrides `VENUE_APP_ID`)
//! - `VENUE_APP_ID`: Venue application id (default: 1089)
//! - `VENUE_SEND_POLICY`: buffer | fail_fast (default: buffer)
//! - `VENUE_REQUEST_TIMEOUT_SECS`: Request timeout (default: 30)
//! - `VENUE_METRICS_PORT`: Prometheus port, 0 disables (default: 0)
//! - `VENUE_BASE_CURRENCY`: Base currency for the rates feed (default: USD)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log filter (default: venue_stream=info)
//!
//! See `ClientConfig::from_env` for the connection tuning variables.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use venue_stream::infrastructure::telemetry;
use venue_stream::{
    ActiveSymbolsRequest, ClientConfig, ConnectionConfig, ConnectionEvent, ConnectionManager,
    MarketDataService, TungsteniteTransport, init_metrics,
};

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_BASE_CURRENCY: &str = "USD";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting Venue Stream");

    let config = ClientConfig::from_env()?;
    log_config(&config);

    if config.metrics_enabled() {
        let addr = init_metrics(config.metrics_port).context("failed to start metrics exporter")?;
        tracing::info!(addr = %addr, "Metrics exporter listening");
    }

    let connection = ConnectionManager::new(
        ConnectionConfig::from_settings(&config.endpoint, &config.websocket),
        Arc::new(TungsteniteTransport::new()),
    );
    let lifecycle = connection.subscribe(log_lifecycle);
    connection.connect();

    let market_data = MarketDataService::new(connection.clone(), config.request_timeout);

    let pong = market_data.ping().await?;
    tracing::info!(reply = %pong, "Venue reachable");

    let symbols = market_data
        .active_symbols(&ActiveSymbolsRequest::default())
        .await?;
    let open = symbols.iter().filter(|s| s.exchange_is_open).count();
    tracing::info!(total = symbols.len(), open, "Active symbols loaded");

    let base_currency = std::env::var("VENUE_BASE_CURRENCY")
        .unwrap_or_else(|_| DEFAULT_BASE_CURRENCY.to_string());
    let rates = market_data.subscribe_exchange_rates(
        &base_currency,
        None,
        |rates| {
            tracing::info!(
                base = %rates.base_currency,
                quoted = rates.rates.len(),
                date = ?rates.date,
                "Exchange rates"
            );
        },
        |error| tracing::warn!(error = %error, "Exchange rates feed error"),
    )?;

    tracing::info!("Venue Stream ready");

    await_shutdown().await;

    rates.unsubscribe();
    lifecycle.unsubscribe();
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, connection.close())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Connection did not close in time"
        );
    }

    tracing::info!("Venue Stream stopped");
    Ok(())
}

fn log_lifecycle(event: &ConnectionEvent) {
    match event {
        ConnectionEvent::Open => tracing::info!("Connected to venue"),
        ConnectionEvent::Close { reason, kind } => {
            tracing::info!(reason = %reason, kind = ?kind, "Disconnected from venue");
        }
        ConnectionEvent::Error(e) => tracing::warn!(error = %e, "Venue connection error"),
        ConnectionEvent::Message(_) => {}
    }
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    let ws = &config.websocket;
    tracing::info!(
        endpoint = %config.endpoint,
        send_policy = ws.send_policy.as_str(),
        reconnect = ws.reconnect_enabled,
        max_reconnect_attempts = ws.max_reconnect_attempts,
        heartbeat_secs = ws.heartbeat_interval.as_secs(),
        request_timeout_secs = config.request_timeout.as_secs(),
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
