//! Topic keys.
//!
//! A topic names a category of interest: `"<entity-type>:<id>"` for one
//! entity (`list:123`) or `"<entity-type>:all"` for a collection-wide
//! channel (`gifts:all`).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum length of the entity-type segment in bytes.
pub const MAX_ENTITY_TYPE_LEN: usize = 64;

/// Maximum length of the id segment in bytes.
pub const MAX_ID_LEN: usize = 128;

/// Id segment that marks a collection-wide channel.
pub const COLLECTION_ID: &str = "all";

/// Reasons a string is not a valid topic.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    /// The topic string was empty.
    #[error("topic is empty")]
    Empty,
    /// No `:` separating entity type and id.
    #[error("topic must have the form '<entity-type>:<id>'")]
    MissingSeparator,
    /// Entity type is empty, too long, or has characters outside `[A-Za-z0-9_-]`.
    #[error("invalid entity type '{0}'")]
    InvalidEntityType(String),
    /// Id is empty, too long, or contains whitespace, control characters or `:`.
    #[error("invalid topic id '{0}'")]
    InvalidId(String),
}

/// A validated topic key.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic(String);

impl Topic {
    /// Parse and validate a raw topic string.
    pub fn parse(raw: &str) -> Result<Self, TopicError> {
        if raw.is_empty() {
            return Err(TopicError::Empty);
        }
        let (entity, id) = raw.split_once(':').ok_or(TopicError::MissingSeparator)?;
        validate_entity_type(entity)?;
        validate_id(id)?;
        Ok(Self(raw.to_owned()))
    }

    /// Topic for a single entity, e.g. `Topic::entity("list", 123)` → `list:123`.
    pub fn entity(entity_type: &str, id: impl fmt::Display) -> Result<Self, TopicError> {
        Self::parse(&format!("{entity_type}:{id}"))
    }

    /// Collection-wide topic, e.g. `Topic::collection("gifts")` → `gifts:all`.
    pub fn collection(entity_type: &str) -> Result<Self, TopicError> {
        Self::parse(&format!("{entity_type}:{COLLECTION_ID}"))
    }

    /// The entity-type segment.
    pub fn entity_type(&self) -> &str {
        self.0.split_once(':').map_or("", |(entity, _)| entity)
    }

    /// The id segment (`all` for collection topics).
    pub fn id(&self) -> &str {
        self.0.split_once(':').map_or("", |(_, id)| id)
    }

    /// Whether this is a collection-wide channel.
    pub fn is_collection(&self) -> bool {
        self.id() == COLLECTION_ID
    }

    /// Borrow the topic as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_entity_type(entity: &str) -> Result<(), TopicError> {
    let valid = !entity.is_empty()
        && entity.len() <= MAX_ENTITY_TYPE_LEN
        && entity
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(TopicError::InvalidEntityType(entity.to_owned()))
    }
}

fn validate_id(id: &str) -> Result<(), TopicError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && !id.chars().any(|c| c.is_whitespace() || c.is_control() || c == ':');
    if valid {
        Ok(())
    } else {
        Err(TopicError::InvalidId(id.to_owned()))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Topic {
    type Err = TopicError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Topic {
    type Error = TopicError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.0
    }
}
