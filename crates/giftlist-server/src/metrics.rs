//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup,
/// before any metric is recorded.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// A handle backed by a private recorder, for tests and embedding.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// Connections admitted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Connections released (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Live connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Upgrade attempts refused at the gate (counter, labels: reason).
pub const WS_REJECTIONS_TOTAL: &str = "ws_rejections_total";
/// Inbound client frames (counter, labels: action).
pub const WS_FRAMES_RECEIVED_TOTAL: &str = "ws_frames_received_total";
/// Events fanned out (counter, labels: event).
pub const EVENTS_BROADCAST_TOTAL: &str = "events_broadcast_total";
/// Event frames enqueued to subscribers (counter).
pub const EVENT_DELIVERIES_TOTAL: &str = "event_deliveries_total";
/// Event frames that could not be enqueued (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Time from event construction to fan-out completion (histogram).
pub const EVENT_FANOUT_SECONDS: &str = "event_fanout_seconds";
/// Subscribe requests refused by a limit (counter, labels: limit).
pub const SUBSCRIPTION_LIMIT_HITS_TOTAL: &str = "subscription_limit_hits_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_handle_renders() {
        let handle = detached_handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTION_DURATION_SECONDS,
            WS_REJECTIONS_TOTAL,
            WS_FRAMES_RECEIVED_TOTAL,
            EVENTS_BROADCAST_TOTAL,
            EVENT_DELIVERIES_TOTAL,
            WS_BROADCAST_DROPS_TOTAL,
            EVENT_FANOUT_SECONDS,
            SUBSCRIPTION_LIMIT_HITS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
