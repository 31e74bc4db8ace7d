//! Configuration Module
//!
//! Environment-driven configuration for the venue client.

mod settings;

pub use settings::{
    ClientConfig, ConfigError, DEFAULT_APP_ID, SendPolicy, WebSocketSettings, endpoint_for_app,
};
