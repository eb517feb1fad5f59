//! Connection teardown.
//!
//! Every path that ends a connection goes through [`Lifecycle::release`]:
//! client close, socket errors, heartbeat timeout, failed delivery,
//! internal faults and shutdown. Registry cleanup runs on every call; the
//! terminal transition (reason, close token, metrics, log line) happens once.

use std::sync::Arc;

use metrics::{counter, gauge, histogram};
use tracing::{error, info};

use super::connection::{ClientConnection, DisconnectReason};
use super::protocol::ServerFrame;
use super::registry::TopicRegistry;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTION_DURATION_SECONDS, WS_DISCONNECTIONS_TOTAL};

/// Releases connections from the registry exactly once.
#[derive(Clone)]
pub struct Lifecycle {
    registry: Arc<TopicRegistry>,
}

impl Lifecycle {
    /// Create a lifecycle manager over `registry`.
    pub fn new(registry: Arc<TopicRegistry>) -> Self {
        Self { registry }
    }

    /// The registry connections are released from.
    pub fn registry(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    /// Remove every registry entry of `conn` and close it.
    ///
    /// Safe to call from any task, any number of times. Returns `true` only
    /// for the call that performed the transition.
    pub fn release(&self, conn: &ClientConnection, reason: DisconnectReason) -> bool {
        let released = self.registry.disconnect(conn.id());
        if !conn.mark_disconnected(reason) {
            return false;
        }
        conn.close_token().cancel();

        counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(WS_CONNECTION_DURATION_SECONDS).record(conn.age().as_secs_f64());
        info!(
            conn_id = %conn.id(),
            subject = %conn.subject(),
            reason = reason.as_str(),
            subscriptions = released.unwrap_or(0),
            dropped = conn.drop_count(),
            "connection released"
        );
        true
    }

    /// Handle an unrecoverable processing fault: tell the client, then
    /// release with [`DisconnectReason::Fault`].
    pub fn fail(&self, conn: &ClientConnection, detail: &str) -> bool {
        error!(conn_id = %conn.id(), detail, "connection fault");
        let _ = conn.send(ServerFrame::internal_error().encode());
        self.release(conn, DisconnectReason::Fault)
    }

    /// Guard that releases `conn` when dropped.
    pub fn guard(&self, conn: Arc<ClientConnection>) -> ConnectionGuard {
        ConnectionGuard {
            lifecycle: self.clone(),
            connection: conn,
            reason: DisconnectReason::TransportError,
        }
    }
}

/// Releases its connection on drop, including on panic or task abort.
pub struct ConnectionGuard {
    lifecycle: Lifecycle,
    connection: Arc<ClientConnection>,
    reason: DisconnectReason,
}

impl ConnectionGuard {
    /// Reason recorded if the guard performs the release.
    pub fn set_reason(&mut self, reason: DisconnectReason) {
        self.reason = reason;
    }

    /// The guarded connection.
    pub fn connection(&self) -> &Arc<ClientConnection> {
        &self.connection
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let _ = self.lifecycle.release(&self.connection, self.reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::tests::make_connection;
    use giftlist_core::Topic;

    fn setup() -> (Lifecycle, Arc<ClientConnection>, tokio::sync::mpsc::Receiver<Arc<String>>) {
        let registry = Arc::new(TopicRegistry::default());
        let (conn, rx) = make_connection(8);
        registry.register(Arc::clone(&conn)).unwrap();
        let _ = registry
            .subscribe(conn.id(), &Topic::parse("list:1").unwrap())
            .unwrap();
        (Lifecycle::new(registry), conn, rx)
    }

    #[test]
    fn release_cleans_registry_and_cancels() {
        let (lifecycle, conn, _rx) = setup();
        assert!(lifecycle.release(&conn, DisconnectReason::ClientClosed));
        assert!(!lifecycle.registry().contains(conn.id()));
        assert_eq!(lifecycle.registry().topic_count(), 0);
        assert!(conn.close_token().is_cancelled());
        assert_eq!(conn.disconnect_reason(), Some(DisconnectReason::ClientClosed));
    }

    #[test]
    fn second_release_is_noop() {
        let (lifecycle, conn, _rx) = setup();
        assert!(lifecycle.release(&conn, DisconnectReason::SendFailed));
        assert!(!lifecycle.release(&conn, DisconnectReason::ClientClosed));
        assert_eq!(conn.disconnect_reason(), Some(DisconnectReason::SendFailed));
    }

    #[test]
    fn concurrent_release_transitions_once() {
        let (lifecycle, conn, _rx) = setup();
        let wins: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| lifecycle.release(&conn, DisconnectReason::TransportError)))
                .collect();
            handles
                .into_iter()
                .map(|h| usize::from(h.join().unwrap()))
                .sum()
        });
        assert_eq!(wins, 1);
        assert!(!lifecycle.registry().contains(conn.id()));
    }

    #[tokio::test]
    async fn fail_notifies_then_releases() {
        let (lifecycle, conn, mut rx) = setup();
        assert!(lifecycle.fail(&conn, "boom"));
        let frame = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["error"], "Internal server error");
        assert_eq!(conn.disconnect_reason(), Some(DisconnectReason::Fault));
        assert!(!lifecycle.registry().contains(conn.id()));
    }

    #[test]
    fn fail_with_closed_queue_still_releases() {
        let (lifecycle, conn, rx) = setup();
        drop(rx);
        assert!(lifecycle.fail(&conn, "boom"));
        assert!(!lifecycle.registry().contains(conn.id()));
    }

    #[test]
    fn guard_releases_on_drop_with_reason() {
        let (lifecycle, conn, _rx) = setup();
        let mut guard = lifecycle.guard(Arc::clone(&conn));
        assert_eq!(guard.connection().id(), conn.id());
        guard.set_reason(DisconnectReason::HeartbeatTimeout);
        drop(guard);
        assert_eq!(conn.disconnect_reason(), Some(DisconnectReason::HeartbeatTimeout));
        assert!(!lifecycle.registry().contains(conn.id()));
    }

    #[test]
    fn guard_after_explicit_release_keeps_first_reason() {
        let (lifecycle, conn, _rx) = setup();
        let guard = lifecycle.guard(Arc::clone(&conn));
        assert!(lifecycle.release(&conn, DisconnectReason::ServerShutdown));
        drop(guard);
        assert_eq!(conn.disconnect_reason(), Some(DisconnectReason::ServerShutdown));
    }

    #[tokio::test]
    async fn guard_releases_when_task_panics() {
        let (lifecycle, conn, _rx) = setup();
        let guard = lifecycle.guard(Arc::clone(&conn));
        let task = tokio::spawn(async move {
            let _guard = guard;
            panic!("session crashed");
        });
        assert!(task.await.is_err());
        assert!(conn.is_disconnected());
        assert!(!lifecycle.registry().contains(conn.id()));
    }
}
