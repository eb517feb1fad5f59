//! Inbound frame dispatch: decode, apply to the registry, build the reply.

use std::sync::Arc;

use giftlist_core::ConnectionId;
use metrics::counter;
use tracing::{debug, instrument, warn};

use super::connection::ClientConnection;
use super::protocol::{ClientCommand, ServerFrame};
use super::registry::{RegistryError, SubscribeOutcome, TopicRegistry};
use crate::metrics::{SUBSCRIPTION_LIMIT_HITS_TOTAL, WS_FRAMES_RECEIVED_TOTAL};

/// A failure that ends the connection.
#[derive(Debug, thiserror::Error)]
pub enum DispatchFault {
    /// The connection was released while a frame was in flight.
    #[error("connection {0} is no longer registered")]
    Unregistered(ConnectionId),
}

/// Turns client frames into registry operations and reply frames.
pub struct MessageDispatcher {
    registry: Arc<TopicRegistry>,
}

impl MessageDispatcher {
    /// Create a dispatcher over `registry`.
    pub fn new(registry: Arc<TopicRegistry>) -> Self {
        Self { registry }
    }

    /// Handle one text frame.
    ///
    /// Protocol problems produce an error frame; only a fault ends the
    /// connection.
    #[instrument(skip_all, fields(conn_id = %conn.id(), action = tracing::field::Empty))]
    pub fn handle_text(
        &self,
        conn: &ClientConnection,
        raw: &str,
    ) -> Result<ServerFrame, DispatchFault> {
        let command = ClientCommand::decode(raw);
        let _ = tracing::Span::current().record("action", command.name());
        counter!(WS_FRAMES_RECEIVED_TOTAL, "action" => command.name()).increment(1);
        self.execute(conn, command)
    }

    /// Handle one binary frame. UTF-8 payloads are treated as text.
    pub fn handle_binary(
        &self,
        conn: &ClientConnection,
        raw: &[u8],
    ) -> Result<ServerFrame, DispatchFault> {
        match std::str::from_utf8(raw) {
            Ok(text) => self.handle_text(conn, text),
            Err(_) => {
                debug!(conn_id = %conn.id(), len = raw.len(), "non-UTF-8 binary frame");
                counter!(WS_FRAMES_RECEIVED_TOTAL, "action" => "invalid").increment(1);
                Ok(ServerFrame::error(
                    "Binary frames must contain UTF-8 JSON",
                    None,
                ))
            }
        }
    }

    fn execute(
        &self,
        conn: &ClientConnection,
        command: ClientCommand,
    ) -> Result<ServerFrame, DispatchFault> {
        match command {
            ClientCommand::Ping => Ok(ServerFrame::Pong),
            ClientCommand::Subscribe { topic } => {
                match self.registry.subscribe(conn.id(), &topic) {
                    Ok(outcome) => {
                        debug!(
                            %topic,
                            new = outcome == SubscribeOutcome::Added,
                            "subscribed"
                        );
                        Ok(ServerFrame::Subscribed(topic))
                    }
                    Err(RegistryError::UnknownConnection(id)) => Err(DispatchFault::Unregistered(id)),
                    Err(err) => {
                        warn!(%topic, error = %err, "subscribe refused");
                        counter!(SUBSCRIPTION_LIMIT_HITS_TOTAL, "limit" => err.kind()).increment(1);
                        Ok(ServerFrame::error(
                            "Subscription limit reached",
                            Some(err.to_string()),
                        ))
                    }
                }
            }
            ClientCommand::Unsubscribe { topic } => {
                let removed = self.registry.unsubscribe(conn.id(), &topic);
                debug!(%topic, removed, "unsubscribed");
                Ok(ServerFrame::Unsubscribed(topic))
            }
            ClientCommand::Invalid { reason, details } => {
                debug!(reason = %reason, ?details, "invalid client frame");
                Ok(ServerFrame::Error {
                    message: reason,
                    details,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::tests::make_connection;
    use crate::websocket::registry::RegistryLimits;
    use giftlist_core::Topic;
    use serde_json::json;

    fn setup(limits: RegistryLimits) -> (MessageDispatcher, Arc<TopicRegistry>, Arc<ClientConnection>) {
        let registry = Arc::new(TopicRegistry::new(limits));
        let (conn, _rx) = make_connection(8);
        registry.register(Arc::clone(&conn)).unwrap();
        (MessageDispatcher::new(Arc::clone(&registry)), registry, conn)
    }

    fn reply(dispatcher: &MessageDispatcher, conn: &ClientConnection, raw: &str) -> serde_json::Value {
        dispatcher.handle_text(conn, raw).unwrap().to_json()
    }

    #[test]
    fn subscribe_confirms_and_registers() {
        let (d, registry, conn) = setup(RegistryLimits::default());
        let out = reply(&d, &conn, r#"{"action":"subscribe","topic":"list:42"}"#);
        assert_eq!(out, json!({"action": "subscribed", "topic": "list:42"}));
        assert_eq!(registry.topics(conn.id()), vec![Topic::parse("list:42").unwrap()]);
    }

    #[test]
    fn duplicate_subscribe_confirms_again() {
        let (d, registry, conn) = setup(RegistryLimits::default());
        let frame = r#"{"action":"subscribe","topic":"list:42"}"#;
        let _ = reply(&d, &conn, frame);
        assert_eq!(reply(&d, &conn, frame)["action"], "subscribed");
        assert_eq!(registry.subscription_count(), 1);
    }

    #[test]
    fn unsubscribe_confirms_even_when_not_joined() {
        let (d, registry, conn) = setup(RegistryLimits::default());
        let out = reply(&d, &conn, r#"{"action":"unsubscribe","topic":"list:7"}"#);
        assert_eq!(out, json!({"action": "unsubscribed", "topic": "list:7"}));
        assert_eq!(registry.topic_count(), 0);
    }

    #[test]
    fn ping_pongs_without_registry_change() {
        let (d, registry, conn) = setup(RegistryLimits::default());
        assert_eq!(reply(&d, &conn, r#"{"action":"ping"}"#), json!({"action": "pong"}));
        assert_eq!(registry.stats().subscriptions, 0);

        let _ = reply(&d, &conn, r#"{"action":"subscribe","topic":"list:1"}"#);
        assert_eq!(reply(&d, &conn, r#"{"action":"ping"}"#), json!({"action": "pong"}));
        assert_eq!(registry.stats().subscriptions, 1);
    }

    #[test]
    fn unknown_shape_yields_error_and_connection_stays_usable() {
        let (d, _registry, conn) = setup(RegistryLimits::default());
        let out = reply(&d, &conn, r#"{"foo":"bar"}"#);
        assert!(out["error"].is_string());
        assert_eq!(reply(&d, &conn, r#"{"action":"ping"}"#)["action"], "pong");
    }

    #[test]
    fn topic_limit_yields_error_frame() {
        let (d, registry, conn) = setup(RegistryLimits {
            max_topics_per_connection: 1,
            ..RegistryLimits::default()
        });
        let _ = reply(&d, &conn, r#"{"action":"subscribe","topic":"list:1"}"#);
        let out = reply(&d, &conn, r#"{"action":"subscribe","topic":"list:2"}"#);
        assert_eq!(out["error"], "Subscription limit reached");
        assert!(out["details"].as_str().unwrap().contains('1'));
        assert_eq!(registry.subscription_count(), 1);
    }

    #[test]
    fn subscribe_on_released_connection_is_a_fault() {
        let (d, registry, conn) = setup(RegistryLimits::default());
        let _ = registry.disconnect(conn.id());
        let result = d.handle_text(&conn, r#"{"action":"subscribe","topic":"list:1"}"#);
        assert!(matches!(result, Err(DispatchFault::Unregistered(_))));
        assert_eq!(registry.topic_count(), 0);
    }

    #[test]
    fn binary_utf8_is_text() {
        let (d, _registry, conn) = setup(RegistryLimits::default());
        let out = d.handle_binary(&conn, br#"{"action":"ping"}"#).unwrap();
        assert_eq!(out, ServerFrame::Pong);
    }

    #[test]
    fn binary_non_utf8_is_error() {
        let (d, _registry, conn) = setup(RegistryLimits::default());
        let out = d.handle_binary(&conn, &[0xff, 0xfe, 0x00]).unwrap();
        assert!(matches!(out, ServerFrame::Error { .. }));
    }
}
