//! WebSocket session: one admitted client from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use super::connection::{ClientConnection, DisconnectReason};
use super::dispatcher::MessageDispatcher;
use super::gate::{Admission, GateRejection};
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use super::lifecycle::Lifecycle;

/// Upper bound on the close handshake once a connection is closing.
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Timing for a session.
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    /// Interval between server pings.
    pub heartbeat_interval: Duration,
    /// Silence after which the connection is dropped.
    pub heartbeat_timeout: Duration,
    /// Time allowed to flush queued frames and send the close frame.
    pub flush_timeout: Duration,
}

/// Everything a session task needs, cheap to clone into the upgrade callback.
#[derive(Clone)]
pub struct SessionContext {
    /// Inbound frame handler.
    pub dispatcher: Arc<MessageDispatcher>,
    /// Teardown path.
    pub lifecycle: Lifecycle,
    /// Timing.
    pub config: SessionConfig,
}

/// Run an admitted session until the client leaves or the connection is
/// released elsewhere.
///
/// The reader runs here together with the heartbeat; a writer task drains
/// the outbound queue. Whatever ends the loop, the admission guard releases
/// the connection and the writer sends the matching close frame.
#[instrument(skip_all, fields(conn_id = %admission.connection.id()))]
pub async fn run_ws_session(ws: WebSocket, admission: Admission, ctx: SessionContext) {
    let Admission {
        connection,
        outbound,
        mut guard,
    } = admission;
    let (ws_tx, mut ws_rx) = ws.split();
    let cancel = connection.close_token().clone();

    let mut writer = tokio::spawn(run_writer(
        ws_tx,
        outbound,
        Arc::clone(&connection),
        ctx.clone(),
    ));

    let heartbeat = run_heartbeat(
        Arc::clone(&connection),
        ctx.config.heartbeat_interval,
        ctx.config.heartbeat_timeout,
        cancel.clone(),
    );
    tokio::pin!(heartbeat);

    let reason = loop {
        tokio::select! {
            () = cancel.cancelled() => break None,
            result = &mut heartbeat => {
                break (result == HeartbeatResult::TimedOut).then_some(DisconnectReason::HeartbeatTimeout);
            }
            frame = ws_rx.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket read error");
                        break Some(DisconnectReason::TransportError);
                    }
                    None => break Some(DisconnectReason::ClientClosed),
                };
                connection.mark_alive();

                let handled = match msg {
                    Message::Text(text) => ctx.dispatcher.handle_text(&connection, text.as_str()),
                    Message::Binary(data) => ctx.dispatcher.handle_binary(&connection, &data),
                    Message::Close(_) => break Some(DisconnectReason::ClientClosed),
                    Message::Ping(_) | Message::Pong(_) => continue,
                };
                match handled {
                    Ok(reply) => {
                        if let Err(e) = connection.send(reply.encode()) {
                            warn!(error = %e, "failed to enqueue reply");
                            break Some(DisconnectReason::SendFailed);
                        }
                    }
                    Err(fault) => {
                        let _ = ctx.lifecycle.fail(&connection, &fault.to_string());
                        break None;
                    }
                }
            }
        }
    };

    if let Some(reason) = reason {
        guard.set_reason(reason);
    }
    drop(guard);

    // The writer owns the close handshake and bounds it by the flush
    // timeout; a writer stuck past that is aborted so the socket drops.
    match tokio::time::timeout(ctx.config.flush_timeout * 2, &mut writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "writer task failed"),
        Err(_) => {
            warn!("writer did not finish, aborting");
            writer.abort();
        }
    }
}

async fn run_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Arc<String>>,
    connection: Arc<ClientConnection>,
    ctx: SessionContext,
) {
    let cancel = connection.close_token().clone();
    let mut ping = tokio::time::interval(ctx.config.heartbeat_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let _ = ping.tick().await;

    loop {
        let msg = tokio::select! {
            () = cancel.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(text) => Message::Text(text.as_str().into()),
                None => break,
            },
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };
        // A client that stops reading stalls the send; release must still win.
        let sent = tokio::select! {
            () = cancel.cancelled() => break,
            result = sink.send(msg) => result,
        };
        if let Err(e) = sent {
            debug!(error = %e, "websocket write error");
            let _ = ctx
                .lifecycle
                .release(&connection, DisconnectReason::TransportError);
            return;
        }
    }

    let closing = close_gracefully(&mut sink, &mut outbound, &connection);
    if tokio::time::timeout(ctx.config.flush_timeout, closing)
        .await
        .is_err()
    {
        debug!("close handshake timed out, dropping socket");
    }
}

/// Deliver what was already queued, then send the close frame.
///
/// A slow consumer's backlog is discarded.
async fn close_gracefully(
    sink: &mut SplitSink<WebSocket, Message>,
    outbound: &mut mpsc::Receiver<Arc<String>>,
    connection: &ClientConnection,
) {
    outbound.close();
    let reason = connection.disconnect_reason();
    if reason != Some(DisconnectReason::SendFailed) {
        while let Some(text) = outbound.recv().await {
            if sink.send(Message::Text(text.as_str().into())).await.is_err() {
                return;
            }
        }
    }

    if let Some((code, reason)) = reason.and_then(DisconnectReason::close_frame) {
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        let _ = sink.send(Message::Close(Some(frame))).await;
    }
    let _ = sink.close().await;
}

/// Close a socket whose upgrade was refused at the gate.
pub async fn reject(mut ws: WebSocket, rejection: GateRejection) {
    let frame = CloseFrame {
        code: rejection.close_code(),
        reason: rejection.close_reason().into(),
    };
    let _ = ws.send(Message::Close(Some(frame))).await;
}
