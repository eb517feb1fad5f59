//! Server configuration.

use std::time::Duration;

use giftlist_settings::RealtimeSettings;

use crate::websocket::registry::RegistryLimits;
use crate::websocket::session::{FLUSH_TIMEOUT, SessionConfig};

/// Runtime configuration for [`RealtimeServer`](crate::RealtimeServer).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Seconds between server pings.
    pub heartbeat_interval_secs: u64,
    /// Seconds of silence before a connection is dropped.
    pub heartbeat_timeout_secs: u64,
    /// Outbound frames buffered per connection.
    pub send_queue_capacity: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Seconds to wait for sessions to finish on shutdown.
    pub shutdown_timeout_secs: u64,
    /// Connection and subscription limits.
    pub limits: RegistryLimits,
}

impl ServerConfig {
    /// Session timing derived from this config.
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs.max(1)),
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs.max(1)),
            flush_timeout: FLUSH_TIMEOUT,
        }
    }

    /// Shutdown drain timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            send_queue_capacity: 256,
            max_message_size: 64 * 1024,
            shutdown_timeout_secs: 10,
            limits: RegistryLimits::default(),
        }
    }
}

impl From<&RealtimeSettings> for ServerConfig {
    fn from(settings: &RealtimeSettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            heartbeat_interval_secs: server.heartbeat_interval_secs,
            heartbeat_timeout_secs: server.heartbeat_timeout_secs,
            send_queue_capacity: server.send_queue_capacity,
            max_message_size: server.max_message_size,
            shutdown_timeout_secs: server.shutdown_timeout_secs,
            limits: RegistryLimits::from(&settings.limits),
        }
    }
}
