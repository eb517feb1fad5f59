//! WebSocket client connection state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use giftlist_core::{ConnectionId, SubjectId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Why a connection was torn down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client sent a close frame or ended the stream.
    ClientClosed,
    /// Reading from or writing to the socket failed.
    TransportError,
    /// A frame could not be enqueued (queue full or closed).
    SendFailed,
    /// No pong within the heartbeat timeout.
    HeartbeatTimeout,
    /// Unrecoverable processing error.
    Fault,
    /// The server is stopping.
    ServerShutdown,
}

impl DisconnectReason {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::TransportError => "transport_error",
            Self::SendFailed => "send_failed",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Fault => "fault",
            Self::ServerShutdown => "server_shutdown",
        }
    }

    /// Close code and reason the server sends, if the socket is still usable.
    pub fn close_frame(self) -> Option<(u16, &'static str)> {
        match self {
            Self::ClientClosed => Some((1000, "closed")),
            Self::TransportError => None,
            Self::SendFailed => Some((1008, "slow consumer")),
            Self::HeartbeatTimeout => Some((1001, "heartbeat timeout")),
            Self::Fault => Some((1011, "internal error")),
            Self::ServerShutdown => Some((1001, "server shutting down")),
        }
    }
}

/// Why an outbound frame was not enqueued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The outbound queue is at capacity.
    #[error("outbound queue full")]
    QueueFull,
    /// The writer task is gone.
    #[error("outbound queue closed")]
    Closed,
}

/// One admitted WebSocket client.
///
/// Shared between the session task, the registry and any broadcaster that
/// snapshots it. Outbound frames go through a bounded queue drained by the
/// session's writer task.
pub struct ClientConnection {
    id: ConnectionId,
    subject: SubjectId,
    tx: mpsc::Sender<Arc<String>>,
    /// When the connection was admitted.
    pub connected_at: Instant,
    is_alive: AtomicBool,
    last_seen: Mutex<Instant>,
    dropped_messages: AtomicU64,
    close: CancellationToken,
    disconnect_reason: OnceLock<DisconnectReason>,
}

impl ClientConnection {
    /// Create a connection around the sending half of its outbound queue.
    pub fn new(id: ConnectionId, subject: SubjectId, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            subject,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            close: CancellationToken::new(),
            disconnect_reason: OnceLock::new(),
        }
    }

    /// Connection identifier.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Authenticated identity behind the connection.
    pub fn subject(&self) -> &SubjectId {
        &self.subject
    }

    /// Enqueue a serialized frame without waiting.
    ///
    /// Failures bump the dropped-message counter.
    pub fn send(&self, frame: Arc<String>) -> Result<(), SendError> {
        self.tx.try_send(frame).map_err(|err| {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            match err {
                mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => SendError::Closed,
            }
        })
    }

    /// Frames that could not be enqueued.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record inbound activity (pong or any frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound activity.
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Read and clear the alive flag. `true` if there was activity since
    /// the previous check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Token cancelled when the connection is released.
    pub fn close_token(&self) -> &CancellationToken {
        &self.close
    }

    /// Record the terminal reason. Only the first call wins.
    pub fn mark_disconnected(&self, reason: DisconnectReason) -> bool {
        self.disconnect_reason.set(reason).is_ok()
    }

    /// The reason recorded by [`mark_disconnected`](Self::mark_disconnected).
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.disconnect_reason.get().copied()
    }

    /// Whether the connection has been released.
    pub fn is_disconnected(&self) -> bool {
        self.disconnect_reason.get().is_some()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("subject", &self.subject)
            .field("disconnect_reason", &self.disconnect_reason())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn make_connection(
        capacity: usize,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = ClientConnection::new(ConnectionId::new(), SubjectId::from_raw("user_1"), tx);
        (Arc::new(conn), rx)
    }

    #[test]
    fn new_connection_state() {
        let (conn, _rx) = make_connection(4);
        assert!(conn.id().as_str().starts_with("conn_"));
        assert_eq!(conn.subject().as_str(), "user_1");
        assert!(!conn.is_disconnected());
        assert!(!conn.close_token().is_cancelled());
        assert_eq!(conn.drop_count(), 0);
    }

    #[tokio::test]
    async fn send_enqueues_in_order() {
        let (conn, mut rx) = make_connection(8);
        for i in 0..3 {
            conn.send(Arc::new(format!("msg_{i}"))).unwrap();
        }
        for i in 0..3 {
            assert_eq!(*rx.recv().await.unwrap(), format!("msg_{i}"));
        }
    }

    #[test]
    fn send_to_full_queue_fails() {
        let (conn, _rx) = make_connection(1);
        conn.send(Arc::new("first".into())).unwrap();
        assert_eq!(conn.send(Arc::new("second".into())), Err(SendError::QueueFull));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn send_to_closed_queue_fails() {
        let (conn, rx) = make_connection(4);
        drop(rx);
        assert_eq!(conn.send(Arc::new("x".into())), Err(SendError::Closed));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn check_alive_resets_flag() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[test]
    fn first_disconnect_reason_wins() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.mark_disconnected(DisconnectReason::SendFailed));
        assert!(!conn.mark_disconnected(DisconnectReason::ClientClosed));
        assert_eq!(conn.disconnect_reason(), Some(DisconnectReason::SendFailed));
    }

    #[test]
    fn close_frames_per_reason() {
        assert_eq!(DisconnectReason::SendFailed.close_frame().unwrap().0, 1008);
        assert_eq!(DisconnectReason::HeartbeatTimeout.close_frame().unwrap().0, 1001);
        assert_eq!(DisconnectReason::ServerShutdown.close_frame().unwrap().0, 1001);
        assert_eq!(DisconnectReason::Fault.close_frame().unwrap().0, 1011);
        assert!(DisconnectReason::TransportError.close_frame().is_none());
    }
}
