//! Client Configuration Settings
//!
//! Configuration types for the venue client, loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

/// Default venue application id.
pub const DEFAULT_APP_ID: &str = "1089";

const VENUE_WS_BASE: &str = "wss://ws.derivws.com/websockets/v3";

/// When [`send`](crate::ConnectionManager::send) accepts a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendPolicy {
    /// Accept while connecting or open; queued frames go out once the socket opens.
    #[default]
    BufferUntilOpen,
    /// Accept only while open.
    FailFast,
}

impl SendPolicy {
    /// Parse a policy name. Returns `None` for unknown names.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "buffer" | "buffer_until_open" => Some(Self::BufferUntilOpen),
            "fail_fast" | "failfast" => Some(Self::FailFast),
            _ => None,
        }
    }

    /// Configuration name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BufferUntilOpen => "buffer",
            Self::FailFast => "fail_fast",
        }
    }
}

/// WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Limit for a single connection attempt.
    pub connect_timeout: Duration,
    /// Heartbeat ping interval (zero disables the heartbeat).
    pub heartbeat_interval: Duration,
    /// Silence tolerated after a ping before the connection is considered dead.
    pub heartbeat_timeout: Duration,
    /// Whether a lost connection is re-established.
    pub reconnect_enabled: bool,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// When outbound frames are accepted.
    pub send_policy: SendPolicy,
    /// Outbound queue capacity.
    pub outbound_capacity: usize,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            reconnect_enabled: true,
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 10,
            send_policy: SendPolicy::BufferUntilOpen,
            outbound_capacity: 256,
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint.
    pub endpoint: String,
    /// WebSocket connection settings.
    pub websocket: WebSocketSettings,
    /// Default timeout for correlated requests.
    pub request_timeout: Duration,
    /// Prometheus exporter port (0 = disabled).
    pub metrics_port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: endpoint_for_app(DEFAULT_APP_ID),
            websocket: WebSocketSettings::default(),
            request_timeout: Duration::from_secs(30),
            metrics_port: 0,
        }
    }
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// Numeric values that fail to parse fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty endpoint or app id, or an unknown send
    /// policy.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = Self::default();
        let ws = WebSocketSettings::default();

        let endpoint = match env.get("VENUE_WS_URL") {
            Some(url) if url.trim().is_empty() => {
                return Err(ConfigError::EmptyValue("VENUE_WS_URL".to_string()));
            }
            Some(url) => url.trim().to_string(),
            None => {
                let app_id = env
                    .get("VENUE_APP_ID")
                    .unwrap_or_else(|| DEFAULT_APP_ID.to_string());
                if app_id.trim().is_empty() {
                    return Err(ConfigError::EmptyValue("VENUE_APP_ID".to_string()));
                }
                endpoint_for_app(app_id.trim())
            }
        };

        let send_policy = match env.get("VENUE_SEND_POLICY") {
            Some(value) => SendPolicy::from_str_case_insensitive(&value).ok_or_else(|| {
                ConfigError::InvalidValue {
                    key: "VENUE_SEND_POLICY".to_string(),
                    value,
                }
            })?,
            None => ws.send_policy,
        };

        let websocket = WebSocketSettings {
            connect_timeout: env.secs("VENUE_CONNECT_TIMEOUT_SECS", ws.connect_timeout),
            heartbeat_interval: env.secs("VENUE_HEARTBEAT_INTERVAL_SECS", ws.heartbeat_interval),
            heartbeat_timeout: env.secs("VENUE_HEARTBEAT_TIMEOUT_SECS", ws.heartbeat_timeout),
            reconnect_enabled: env.flag("VENUE_RECONNECT_ENABLED", ws.reconnect_enabled),
            reconnect_delay_initial: env.millis(
                "VENUE_RECONNECT_DELAY_INITIAL_MS",
                ws.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.secs("VENUE_RECONNECT_DELAY_MAX_SECS", ws.reconnect_delay_max),
            reconnect_delay_multiplier: env.parse(
                "VENUE_RECONNECT_DELAY_MULTIPLIER",
                ws.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: env.parse(
                "VENUE_MAX_RECONNECT_ATTEMPTS",
                ws.max_reconnect_attempts,
            ),
            send_policy,
            outbound_capacity: env.parse("VENUE_OUTBOUND_CAPACITY", ws.outbound_capacity),
        };

        Ok(Self {
            endpoint,
            websocket,
            request_timeout: env.secs("VENUE_REQUEST_TIMEOUT_SECS", defaults.request_timeout),
            metrics_port: env.parse("VENUE_METRICS_PORT", defaults.metrics_port),
        })
    }

    /// Whether the Prometheus exporter should run.
    #[must_use]
    pub const fn metrics_enabled(&self) -> bool {
        self.metrics_port != 0
    }
}

/// Public endpoint for a venue application id.
#[must_use]
pub fn endpoint_for_app(app_id: &str) -> String {
    format!("{VENUE_WS_BASE}?app_id={app_id}")
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has a value outside its allowed set.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .and_then(|v| match v.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            })
            .unwrap_or(default)
    }
}
