//! Heartbeat liveness monitoring.
//!
//! The session writer sends a ping every `interval`; this loop checks at the
//! same cadence whether anything came back.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use super::connection::ClientConnection;

/// How the heartbeat loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// No activity for `timeout`.
    TimedOut,
    /// The connection was closed by something else.
    Cancelled,
}

/// Watch a connection's liveness until it times out or `cancel` fires.
///
/// Each tick reads and clears the alive flag. `timeout / interval`
/// consecutive silent ticks (at least one) end the loop with
/// [`HeartbeatResult::TimedOut`].
pub async fn run_heartbeat(
    connection: Arc<ClientConnection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    // The first tick fires immediately.
    let _ = ticker.tick().await;

    let max_missed = max_missed(interval, timeout);
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if connection.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        tracing::debug!(
                            conn_id = %connection.id(),
                            silent_for = ?connection.last_seen_elapsed(),
                            "heartbeat timed out"
                        );
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
        }
    }
}

fn max_missed(interval: Duration, timeout: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    u32::try_from(timeout.as_millis() / interval_ms)
        .unwrap_or(u32::MAX)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::tests::make_connection;

    #[test]
    fn max_missed_from_timeout_and_interval() {
        assert_eq!(max_missed(Duration::from_secs(30), Duration::from_secs(90)), 3);
        assert_eq!(max_missed(Duration::from_secs(30), Duration::from_secs(10)), 1);
        assert_eq!(max_missed(Duration::from_millis(100), Duration::from_millis(350)), 3);
    }

    #[tokio::test]
    async fn cancelled_heartbeat_returns_cancelled() {
        let (conn, _rx) = make_connection(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_heartbeat(conn, Duration::from_secs(60), Duration::from_secs(180), cancel).await;
        assert_eq!(result, HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connection_times_out() {
        let (conn, _rx) = make_connection(1);
        let _ = conn.check_alive();
        let result = run_heartbeat(
            conn,
            Duration::from_millis(100),
            Duration::from_millis(300),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn active_connection_stays_alive() {
        let (conn, _rx) = make_connection(1);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_heartbeat(
            Arc::clone(&conn),
            Duration::from_millis(100),
            Duration::from_millis(300),
            cancel.clone(),
        ));

        for _ in 0..20 {
            time::sleep(Duration::from_millis(50)).await;
            conn.mark_alive();
        }
        assert!(!handle.is_finished());
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }
}
