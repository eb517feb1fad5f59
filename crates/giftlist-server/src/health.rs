//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

use crate::websocket::registry::RegistryStats;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while accepting connections, `"shutting_down"` after stop.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered connections.
    pub connections: usize,
    /// Topics with at least one subscriber.
    pub topics: usize,
    /// Connection × topic pairs.
    pub subscriptions: usize,
}

/// Build a health response from registry counts.
pub fn health_check(start_time: Instant, accepting: bool, stats: RegistryStats) -> HealthResponse {
    HealthResponse {
        status: if accepting { "ok" } else { "shutting_down" },
        uptime_secs: start_time.elapsed().as_secs(),
        connections: stats.connections,
        topics: stats.topics,
        subscriptions: stats.subscriptions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reflects_accepting() {
        assert_eq!(health_check(Instant::now(), true, RegistryStats::default()).status, "ok");
        assert_eq!(
            health_check(Instant::now(), false, RegistryStats::default()).status,
            "shutting_down"
        );
    }

    #[test]
    fn uptime_counts_from_start() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        assert!(health_check(start, true, RegistryStats::default()).uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let stats = RegistryStats {
            connections: 3,
            topics: 2,
            subscriptions: 5,
        };
        let parsed = serde_json::to_value(health_check(Instant::now(), true, stats)).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 3);
        assert_eq!(parsed["topics"], 2);
        assert_eq!(parsed["subscriptions"], 5);
        assert!(parsed["uptime_secs"].is_number());
    }
}
