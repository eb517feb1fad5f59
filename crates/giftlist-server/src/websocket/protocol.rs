//! Client and server frame formats.
//!
//! Client → server:
//! ```text
//! {"action": "subscribe",   "topic": "<topic>"}
//! {"action": "unsubscribe", "topic": "<topic>"}
//! {"action": "ping"}
//! ```
//!
//! Server → client:
//! ```text
//! {"action": "subscribed",   "topic": "<topic>"}
//! {"action": "unsubscribed", "topic": "<topic>"}
//! {"action": "pong"}
//! {"error": "<message>", "details"?: "<info>"}
//! {"topic": "<topic>", "event": "<EVENT_KIND>", "data": {...}}
//! ```

use std::sync::Arc;

use giftlist_core::{EventKind, Topic};
use serde::Serialize;
use serde_json::{Map, Value, json};

/// A decoded client frame. Decoding never fails; bad input becomes
/// [`ClientCommand::Invalid`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientCommand {
    /// Start receiving events for `topic`.
    Subscribe {
        /// Topic to join.
        topic: Topic,
    },
    /// Stop receiving events for `topic`.
    Unsubscribe {
        /// Topic to leave.
        topic: Topic,
    },
    /// Application-level keepalive.
    Ping,
    /// The frame could not be understood.
    Invalid {
        /// Short message sent as `error`.
        reason: String,
        /// Extra context sent as `details`.
        details: Option<String>,
    },
}

impl ClientCommand {
    /// Decode one raw text frame.
    pub fn decode(raw: &str) -> Self {
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => return invalid("Invalid JSON", Some(e.to_string())),
        };
        let Value::Object(fields) = value else {
            return invalid("Message must be a JSON object", None);
        };
        let action = match fields.get("action") {
            Some(Value::String(action)) => action.as_str(),
            Some(_) => return invalid("Field `action` must be a string", None),
            None => return invalid("Missing field `action`", None),
        };
        match action {
            "ping" => Self::Ping,
            "subscribe" => match topic_field(&fields, action) {
                Ok(topic) => Self::Subscribe { topic },
                Err(cmd) => cmd,
            },
            "unsubscribe" => match topic_field(&fields, action) {
                Ok(topic) => Self::Unsubscribe { topic },
                Err(cmd) => cmd,
            },
            other => invalid("Unknown action", Some(format!("`{other}` is not supported"))),
        }
    }

    /// Action label for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Ping => "ping",
            Self::Invalid { .. } => "invalid",
        }
    }
}

fn invalid(reason: &str, details: Option<String>) -> ClientCommand {
    ClientCommand::Invalid {
        reason: reason.to_owned(),
        details,
    }
}

fn topic_field(fields: &Map<String, Value>, action: &str) -> Result<Topic, ClientCommand> {
    let Some(raw) = fields.get("topic").and_then(Value::as_str) else {
        return Err(invalid(
            "Missing field `topic`",
            Some(format!("`{action}` requires a string `topic`")),
        ));
    };
    Topic::parse(raw).map_err(|e| invalid("Invalid topic", Some(e.to_string())))
}

/// A reply to a client command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerFrame {
    /// Subscribe confirmation.
    Subscribed(Topic),
    /// Unsubscribe confirmation.
    Unsubscribed(Topic),
    /// Reply to `ping`.
    Pong,
    /// Protocol or processing error.
    Error {
        /// Sent as `error`.
        message: String,
        /// Sent as `details`, omitted when `None`.
        details: Option<String>,
    },
}

impl ServerFrame {
    /// Error frame.
    pub fn error(message: impl Into<String>, details: Option<String>) -> Self {
        Self::Error {
            message: message.into(),
            details,
        }
    }

    /// The generic frame sent before closing on an internal fault.
    pub fn internal_error() -> Self {
        Self::error("Internal server error", None)
    }

    /// JSON form of the frame.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Subscribed(topic) => json!({"action": "subscribed", "topic": topic}),
            Self::Unsubscribed(topic) => json!({"action": "unsubscribed", "topic": topic}),
            Self::Pong => json!({"action": "pong"}),
            Self::Error {
                message,
                details: None,
            } => json!({"error": message}),
            Self::Error {
                message,
                details: Some(details),
            } => json!({"error": message, "details": details}),
        }
    }

    /// Serialized frame, ready to enqueue.
    pub fn encode(&self) -> Arc<String> {
        Arc::new(self.to_json().to_string())
    }
}

#[derive(Serialize)]
struct EventFrame<'a> {
    topic: &'a Topic,
    event: EventKind,
    data: &'a Value,
}

/// Serialize an event frame. Exactly three keys: `topic`, `event`, `data`.
pub fn encode_event(topic: &Topic, kind: EventKind, data: &Value) -> serde_json::Result<String> {
    serde_json::to_string(&EventFrame {
        topic,
        event: kind,
        data,
    })
}
