//! Keep-alive
//!
//! The venue drops idle connections, so while the socket is open the driver
//! sends an application-level `{"ping": 1}` every `ping_interval`. Any inbound
//! frame counts as proof of life; if nothing arrives within `pong_timeout`
//! of a ping, the connection is declared dead.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::domain::frame::{OutboundFrame, PassthroughTag};
use crate::infrastructure::config::WebSocketSettings;

/// Keep-alive timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Silence tolerated after a ping.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
        }
    }
}

impl HeartbeatConfig {
    /// Build from settings. `None` when the interval is zero.
    #[must_use]
    pub fn from_settings(settings: &WebSocketSettings) -> Option<Self> {
        (!settings.heartbeat_interval.is_zero()).then_some(Self {
            ping_interval: settings.heartbeat_interval,
            pong_timeout: settings.heartbeat_timeout,
        })
    }
}

/// What the driver should do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Write a ping frame.
    SendPing,
    /// The peer went silent.
    Timeout(Duration),
}

/// Per-connection keep-alive state, driven by the session loop.
#[derive(Debug)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    ticker: Interval,
    ping_sent_at: Option<Instant>,
}

impl Heartbeat {
    /// Start a heartbeat whose first tick is one interval from now.
    #[must_use]
    pub fn start(config: HeartbeatConfig) -> Self {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + config.ping_interval, config.ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            config,
            ticker,
            ping_sent_at: None,
        }
    }

    /// Wait for the next tick and decide what to do.
    pub async fn tick(&mut self) -> HeartbeatAction {
        self.ticker.tick().await;
        self.evaluate(Instant::now())
    }

    /// Any inbound frame resets the silence timer.
    pub const fn record_inbound(&mut self) {
        self.ping_sent_at = None;
    }

    /// Whether a ping is outstanding.
    #[must_use]
    pub const fn is_waiting(&self) -> bool {
        self.ping_sent_at.is_some()
    }

    fn evaluate(&mut self, now: Instant) -> HeartbeatAction {
        match self.ping_sent_at {
            Some(sent) if now.duration_since(sent) >= self.config.pong_timeout => {
                HeartbeatAction::Timeout(now.duration_since(sent))
            }
            Some(_) => HeartbeatAction::SendPing,
            None => {
                self.ping_sent_at = Some(now);
                HeartbeatAction::SendPing
            }
        }
    }
}

/// The keep-alive frame. Tagged so listeners can ignore the reply.
#[must_use]
pub fn ping_frame() -> OutboundFrame {
    let mut frame = OutboundFrame::new().with("ping", 1);
    frame.set_passthrough(&PassthroughTag::heartbeat());
    frame
}

/// Resolve the next heartbeat tick, or never when heartbeat is disabled.
pub async fn next_tick(heartbeat: Option<&mut Heartbeat>) -> HeartbeatAction {
    match heartbeat {
        Some(heartbeat) => heartbeat.tick().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(ping_ms: u64, timeout_ms: u64) -> HeartbeatConfig {
        HeartbeatConfig {
            ping_interval: Duration::from_millis(ping_ms),
            pong_timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[test]
    fn zero_interval_disables_heartbeat() {
        let settings = WebSocketSettings {
            heartbeat_interval: Duration::ZERO,
            ..WebSocketSettings::default()
        };
        assert!(HeartbeatConfig::from_settings(&settings).is_none());
        assert_eq!(
            HeartbeatConfig::from_settings(&WebSocketSettings::default()),
            Some(HeartbeatConfig::default())
        );
    }

    #[test]
    fn ping_frame_is_tagged() {
        let frame = ping_frame();
        assert_eq!(frame.get("ping"), Some(&serde_json::json!(1)));
        assert_eq!(frame.passthrough(), Some(PassthroughTag::heartbeat().as_value()));
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_sends_ping() {
        let mut heartbeat = Heartbeat::start(config(100, 1000));
        assert_eq!(heartbeat.tick().await, HeartbeatAction::SendPing);
        assert!(heartbeat.is_waiting());
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_traffic_resets_wait() {
        let mut heartbeat = Heartbeat::start(config(100, 150));
        assert_eq!(heartbeat.tick().await, HeartbeatAction::SendPing);
        heartbeat.record_inbound();
        assert!(!heartbeat.is_waiting());
        assert_eq!(heartbeat.tick().await, HeartbeatAction::SendPing);
        heartbeat.record_inbound();
        assert_eq!(heartbeat.tick().await, HeartbeatAction::SendPing);
    }

    #[tokio::test(start_paused = true)]
    async fn silence_times_out() {
        let mut heartbeat = Heartbeat::start(config(100, 150));
        assert_eq!(heartbeat.tick().await, HeartbeatAction::SendPing);
        assert_eq!(heartbeat.tick().await, HeartbeatAction::SendPing);
        assert!(matches!(
            heartbeat.tick().await,
            HeartbeatAction::Timeout(elapsed) if elapsed >= Duration::from_millis(150)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_heartbeat_never_ticks() {
        let result =
            tokio::time::timeout(Duration::from_secs(3600), next_tick(None)).await;
        assert!(result.is_err());
    }
}
