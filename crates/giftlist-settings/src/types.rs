//! Settings type definitions.
//!
//! Field names are camelCase on the wire. Every section carries
//! `#[serde(default)]` so a settings file only needs the values it changes.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for the realtime server.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "auth": { "jwtSecret": "..." },
///   "limits": { "maxTopicsPerConnection": 64 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeSettings {
    /// Network and connection settings.
    pub server: ServerSettings,
    /// Token validation settings.
    pub auth: AuthSettings,
    /// Bounded-resource policy for connections and subscriptions.
    pub limits: LimitSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl RealtimeSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.server.send_queue_capacity == 0 {
            return Err(invalid("server.sendQueueCapacity", "must be at least 1"));
        }
        if self.server.heartbeat_interval_secs == 0 {
            return Err(invalid("server.heartbeatIntervalSecs", "must be at least 1"));
        }
        if self.server.heartbeat_timeout_secs < self.server.heartbeat_interval_secs {
            return Err(invalid(
                "server.heartbeatTimeoutSecs",
                "must not be shorter than heartbeatIntervalSecs",
            ));
        }
        if self.limits.max_connections == 0 {
            return Err(invalid("limits.maxConnections", "must be at least 1"));
        }
        if self.limits.max_topics_per_connection == 0 {
            return Err(invalid("limits.maxTopicsPerConnection", "must be at least 1"));
        }
        if self.limits.max_subscribers_per_topic == 0 {
            return Err(invalid("limits.maxSubscribersPerTopic", "must be at least 1"));
        }
        if self.auth.jwt_secret.is_empty() {
            return Err(invalid("auth.jwtSecret", "is required (set GIFTLIST_JWT_SECRET)"));
        }
        Ok(())
    }
}

fn invalid(key: &'static str, reason: &str) -> SettingsError {
    SettingsError::Invalid {
        key,
        reason: reason.to_owned(),
    }
}

/// Network and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (0 auto-assigns).
    pub port: u16,
    /// Seconds between server-initiated WebSocket pings.
    pub heartbeat_interval_secs: u64,
    /// Seconds without a pong before a connection is dropped.
    pub heartbeat_timeout_secs: u64,
    /// Outbound frames buffered per connection before sends start failing.
    pub send_queue_capacity: usize,
    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_message_size: usize,
    /// Seconds to wait for connections to drain on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            send_queue_capacity: 256,
            max_message_size: 64 * 1024,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Token validation settings.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HS256 secret shared with the token issuer.
    pub jwt_secret: String,
    /// Required `iss` claim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Required `aud` claim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    /// Clock skew tolerated on token expiry, in seconds.
    pub leeway_secs: u64,
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("jwt_secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

/// Bounded-resource policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LimitSettings {
    /// Concurrent connections admitted.
    pub max_connections: usize,
    /// Topics a single connection may subscribe to.
    pub max_topics_per_connection: usize,
    /// Connections a single topic may hold.
    pub max_subscribers_per_topic: usize,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_connections: 1_000,
            max_topics_per_connection: 256,
            max_subscribers_per_topic: 10_000,
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, for terminals.
    #[default]
    Pretty,
    /// One JSON object per line, for log shippers.
    Json,
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> RealtimeSettings {
        let mut s = RealtimeSettings::default();
        s.auth.jwt_secret = "secret".into();
        s
    }

    #[test]
    fn defaults() {
        let s = RealtimeSettings::default();
        assert_eq!(s.server.port, 8090);
        assert_eq!(s.server.heartbeat_interval_secs, 30);
        assert_eq!(s.server.heartbeat_timeout_secs, 90);
        assert_eq!(s.server.send_queue_capacity, 256);
        assert_eq!(s.limits.max_connections, 1_000);
        assert_eq!(s.limits.max_topics_per_connection, 256);
        assert_eq!(s.limits.max_subscribers_per_topic, 10_000);
        assert_eq!(s.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: RealtimeSettings =
            serde_json::from_str(r#"{"server":{"port":9000},"logging":{"format":"json"}}"#).unwrap();
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.logging.format, LogFormat::Json);
        assert_eq!(s.limits.max_connections, 1_000);
    }

    #[test]
    fn camel_case_keys() {
        let json = serde_json::to_value(RealtimeSettings::default()).unwrap();
        assert!(json["server"].get("heartbeatIntervalSecs").is_some());
        assert!(json["limits"].get("maxTopicsPerConnection").is_some());
        assert!(json["auth"].get("jwtSecret").is_some());
    }

    #[test]
    fn debug_redacts_secret() {
        let mut s = valid();
        s.auth.jwt_secret = "hunter2".into();
        let out = format!("{:?}", s.auth);
        assert!(!out.contains("hunter2"));
        assert!(out.contains("<redacted>"));
    }

    #[test]
    fn validate_accepts_defaults_with_secret() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn validate_requires_secret() {
        let err = RealtimeSettings::default().validate().unwrap_err();
        assert!(err.to_string().contains("auth.jwtSecret"));
    }

    #[test]
    fn validate_rejects_zero_queue() {
        let mut s = valid();
        s.server.send_queue_capacity = 0;
        assert!(matches!(
            s.validate(),
            Err(SettingsError::Invalid { key: "server.sendQueueCapacity", .. })
        ));
    }

    #[test]
    fn validate_rejects_timeout_shorter_than_interval() {
        let mut s = valid();
        s.server.heartbeat_interval_secs = 60;
        s.server.heartbeat_timeout_secs = 30;
        assert!(matches!(
            s.validate(),
            Err(SettingsError::Invalid { key: "server.heartbeatTimeoutSecs", .. })
        ));
    }

    #[test]
    fn validate_rejects_zero_limits() {
        let mut s = valid();
        s.limits.max_topics_per_connection = 0;
        assert!(s.validate().is_err());
    }
}
