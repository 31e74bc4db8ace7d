//! Venue Connection
//!
//! The Connection Manager and the pieces its driver task is built from.

pub mod codec;
pub mod dispatcher;
pub mod heartbeat;
pub mod manager;
pub mod reconnect;

pub use codec::{CodecError, JsonCodec};
pub use dispatcher::{DispatchReport, Dispatcher, ListenerGuard, ListenerHandle, ListenerId};
pub use heartbeat::HeartbeatConfig;
pub use manager::{ConnectionConfig, ConnectionError, ConnectionManager, WeakConnectionManager};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
