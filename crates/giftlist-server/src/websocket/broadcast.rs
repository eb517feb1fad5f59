//! Event fan-out to topic subscribers.
//!
//! Delivery is best-effort and at-most-once. Each event is serialized once
//! and enqueued on every current subscriber's outbound queue without
//! waiting. A subscriber whose queue is full or closed is released; the
//! others still receive the event. Events on one topic reach each
//! subscriber in the order `broadcast` was called.

use std::sync::Arc;

use giftlist_core::{Event, EventKind, Topic};
use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::connection::DisconnectReason;
use super::lifecycle::Lifecycle;
use super::protocol;
use crate::metrics::{
    EVENT_DELIVERIES_TOTAL, EVENT_FANOUT_SECONDS, EVENTS_BROADCAST_TOTAL, WS_BROADCAST_DROPS_TOTAL,
};

/// Local enqueue counts for one broadcast. Not a delivery acknowledgement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastOutcome {
    /// Subscribers the frame was enqueued for.
    pub recipients: usize,
    /// Subscribers that could not take the frame and were released.
    pub failed: usize,
}

/// Cloneable handle mutation services use to publish events.
#[derive(Clone)]
pub struct EventBroadcaster {
    lifecycle: Lifecycle,
}

impl EventBroadcaster {
    /// Create a broadcaster that releases failing subscribers via `lifecycle`.
    pub fn new(lifecycle: Lifecycle) -> Self {
        Self { lifecycle }
    }

    /// Send `kind`/`payload` to every connection subscribed to `topic`.
    pub fn broadcast(&self, topic: &Topic, kind: EventKind, payload: &Value) -> BroadcastOutcome {
        let subscribers = self.lifecycle.registry().subscribers(topic);
        if subscribers.is_empty() {
            debug!(%topic, event = %kind, "no subscribers");
            return BroadcastOutcome::default();
        }

        let frame = match protocol::encode_event(topic, kind, payload) {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(%topic, event = %kind, error = %e, "failed to serialize event");
                return BroadcastOutcome::default();
            }
        };

        let mut outcome = BroadcastOutcome::default();
        for conn in &subscribers {
            match conn.send(Arc::clone(&frame)) {
                Ok(()) => outcome.recipients += 1,
                Err(err) => {
                    outcome.failed += 1;
                    warn!(conn_id = %conn.id(), %topic, error = %err, "delivery failed, releasing subscriber");
                    let _ = self.lifecycle.release(conn, DisconnectReason::SendFailed);
                }
            }
        }

        counter!(EVENTS_BROADCAST_TOTAL, "event" => kind.as_str()).increment(1);
        counter!(EVENT_DELIVERIES_TOTAL).increment(outcome.recipients as u64);
        if outcome.failed > 0 {
            counter!(WS_BROADCAST_DROPS_TOTAL).increment(outcome.failed as u64);
        }
        debug!(
            %topic,
            event = %kind,
            recipients = outcome.recipients,
            failed = outcome.failed,
            "broadcast event"
        );
        outcome
    }

    /// Broadcast a constructed [`Event`], recording fan-out latency.
    pub fn publish(&self, event: &Event) -> BroadcastOutcome {
        let outcome = self.broadcast(&event.topic, event.kind, &event.payload);
        let elapsed = chrono::Utc::now() - event.occurred_at;
        if let Ok(elapsed) = elapsed.to_std() {
            histogram!(EVENT_FANOUT_SECONDS).record(elapsed.as_secs_f64());
        }
        outcome
    }
}
