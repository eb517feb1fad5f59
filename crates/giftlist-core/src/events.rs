//! Mutation events pushed to topic subscribers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::topic::Topic;

/// What happened to the entity behind a topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Entity created.
    Added,
    /// Entity fields changed.
    Updated,
    /// Entity removed.
    Deleted,
    /// Gift or list status transition.
    StatusChanged,
    /// Gift assigned to a person or occasion.
    Assigned,
    /// Comment posted on the entity.
    CommentAdded,
}

impl EventKind {
    /// Wire name, as sent in the `event` field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "ADDED",
            Self::Updated => "UPDATED",
            Self::Deleted => "DELETED",
            Self::StatusChanged => "STATUS_CHANGED",
            Self::Assigned => "ASSIGNED",
            Self::CommentAdded => "COMMENT_ADDED",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single mutation notification. Built and consumed within one broadcast;
/// never stored.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// Topic the event is published on.
    pub topic: Topic,
    /// Kind of mutation.
    pub kind: EventKind,
    /// Entity payload forwarded verbatim as `data`.
    pub payload: Value,
    /// When the mutation was committed, as seen by this process.
    pub occurred_at: DateTime<Utc>,
}

impl Event {
    /// Build an event stamped with the current time.
    pub fn new(topic: Topic, kind: EventKind, payload: Value) -> Self {
        Self {
            topic,
            kind,
            payload,
            occurred_at: Utc::now(),
        }
    }
}
