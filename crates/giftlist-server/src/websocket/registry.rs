//! Topic registry: the bidirectional subscription index.
//!
//! Two maps are kept behind one mutex: topic → subscriber ids and
//! connection id → (handle, subscribed topics). Every operation runs in a
//! single critical section, so for any connection `C` and topic `T`,
//! `C ∈ subscribers(T)` exactly when `T ∈ topics(C)`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use giftlist_core::{ConnectionId, Topic};
use giftlist_settings::LimitSettings;
use parking_lot::Mutex;
use serde::Serialize;

use super::connection::ClientConnection;

/// Bounded-resource policy enforced by the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegistryLimits {
    /// Concurrent registered connections.
    pub max_connections: usize,
    /// Topics per connection.
    pub max_topics_per_connection: usize,
    /// Connections per topic.
    pub max_subscribers_per_topic: usize,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self::from(&LimitSettings::default())
    }
}

impl From<&LimitSettings> for RegistryLimits {
    fn from(s: &LimitSettings) -> Self {
        Self {
            max_connections: s.max_connections,
            max_topics_per_connection: s.max_topics_per_connection,
            max_subscribers_per_topic: s.max_subscribers_per_topic,
        }
    }
}

/// Registry operation failures.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// [`TopicRegistry::stop`] has been called.
    #[error("registry is stopped")]
    Closed,
    /// `max_connections` reached.
    #[error("connection limit of {limit} reached")]
    ConnectionLimit {
        /// Configured limit.
        limit: usize,
    },
    /// The connection was never registered or has been released.
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),
    /// `max_topics_per_connection` reached.
    #[error("a connection may subscribe to at most {limit} topics")]
    TopicLimit {
        /// Configured limit.
        limit: usize,
    },
    /// `max_subscribers_per_topic` reached.
    #[error("topic {topic} already has the maximum of {limit} subscribers")]
    SubscriberLimit {
        /// Full topic.
        topic: Topic,
        /// Configured limit.
        limit: usize,
    },
}

impl RegistryError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::ConnectionLimit { .. } => "max_connections",
            Self::UnknownConnection(_) => "unknown_connection",
            Self::TopicLimit { .. } => "max_topics_per_connection",
            Self::SubscriberLimit { .. } => "max_subscribers_per_topic",
        }
    }
}

/// Result of a successful subscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// A new subscription was created.
    Added,
    /// The connection was already subscribed.
    AlreadySubscribed,
}

/// Point-in-time counts, read under one lock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Registered connections.
    pub connections: usize,
    /// Topics with at least one subscriber.
    pub topics: usize,
    /// Connection × topic pairs.
    pub subscriptions: usize,
}

struct Entry {
    handle: Arc<ClientConnection>,
    topics: HashSet<Topic>,
}

struct Inner {
    open: bool,
    topics: HashMap<Topic, HashSet<ConnectionId>>,
    connections: HashMap<ConnectionId, Entry>,
}

/// In-memory subscription index. One instance per server.
pub struct TopicRegistry {
    limits: RegistryLimits,
    inner: Mutex<Inner>,
}

impl TopicRegistry {
    /// Create an open, empty registry.
    pub fn new(limits: RegistryLimits) -> Self {
        Self {
            limits,
            inner: Mutex::new(Inner {
                open: true,
                topics: HashMap::new(),
                connections: HashMap::new(),
            }),
        }
    }

    /// Configured limits.
    pub fn limits(&self) -> RegistryLimits {
        self.limits
    }

    /// Add a connection with no subscriptions.
    ///
    /// Registering an id twice keeps the first entry.
    pub fn register(&self, handle: Arc<ClientConnection>) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        if !inner.open {
            return Err(RegistryError::Closed);
        }
        if inner.connections.contains_key(handle.id()) {
            return Ok(());
        }
        if inner.connections.len() >= self.limits.max_connections {
            return Err(RegistryError::ConnectionLimit {
                limit: self.limits.max_connections,
            });
        }
        let id = handle.id().clone();
        let _ = inner.connections.insert(
            id,
            Entry {
                handle,
                topics: HashSet::new(),
            },
        );
        Ok(())
    }

    /// Subscribe `id` to `topic`, creating the topic bucket if needed.
    pub fn subscribe(
        &self,
        id: &ConnectionId,
        topic: &Topic,
    ) -> Result<SubscribeOutcome, RegistryError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let entry = inner
            .connections
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownConnection(id.clone()))?;

        if entry.topics.contains(topic) {
            return Ok(SubscribeOutcome::AlreadySubscribed);
        }
        if entry.topics.len() >= self.limits.max_topics_per_connection {
            return Err(RegistryError::TopicLimit {
                limit: self.limits.max_topics_per_connection,
            });
        }
        let current = inner.topics.get(topic).map_or(0, HashSet::len);
        if current >= self.limits.max_subscribers_per_topic {
            return Err(RegistryError::SubscriberLimit {
                topic: topic.clone(),
                limit: self.limits.max_subscribers_per_topic,
            });
        }

        let _ = entry.topics.insert(topic.clone());
        let _ = inner
            .topics
            .entry(topic.clone())
            .or_default()
            .insert(id.clone());
        Ok(SubscribeOutcome::Added)
    }

    /// Remove one subscription. Unknown connection or topic is a no-op.
    ///
    /// Returns whether a subscription was removed.
    pub fn unsubscribe(&self, id: &ConnectionId, topic: &Topic) -> bool {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let Some(entry) = inner.connections.get_mut(id) else {
            return false;
        };
        if !entry.topics.remove(topic) {
            return false;
        }
        remove_from_bucket(&mut inner.topics, topic, id);
        true
    }

    /// Remove the connection and every subscription it holds.
    ///
    /// Walks only that connection's own topics. Returns the number of
    /// subscriptions removed, or `None` if the connection was not registered.
    pub fn disconnect(&self, id: &ConnectionId) -> Option<usize> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let entry = inner.connections.remove(id)?;
        for topic in &entry.topics {
            remove_from_bucket(&mut inner.topics, topic, id);
        }
        Some(entry.topics.len())
    }

    /// Snapshot of the handles subscribed to `topic`.
    pub fn subscribers(&self, topic: &Topic) -> Vec<Arc<ClientConnection>> {
        let inner = self.inner.lock();
        let Some(ids) = inner.topics.get(topic) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| inner.connections.get(id))
            .map(|entry| Arc::clone(&entry.handle))
            .collect()
    }

    /// Topics `id` is subscribed to (empty if unknown).
    pub fn topics(&self, id: &ConnectionId) -> Vec<Topic> {
        self.inner
            .lock()
            .connections
            .get(id)
            .map(|entry| entry.topics.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.inner.lock().connections.contains_key(id)
    }

    /// Registered connections.
    pub fn connection_count(&self) -> usize {
        self.inner.lock().connections.len()
    }

    /// Topics with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.inner.lock().topics.len()
    }

    /// Total connection × topic pairs.
    pub fn subscription_count(&self) -> usize {
        self.stats().subscriptions
    }

    /// All counts from a single lock acquisition.
    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.lock();
        RegistryStats {
            connections: inner.connections.len(),
            topics: inner.topics.len(),
            subscriptions: inner.connections.values().map(|e| e.topics.len()).sum(),
        }
    }

    /// Whether new connections are accepted.
    pub fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    /// Close the registry and drain it.
    ///
    /// Later `register` calls fail with [`RegistryError::Closed`]. Returns
    /// the handles that were registered so the caller can close them.
    pub fn stop(&self) -> Vec<Arc<ClientConnection>> {
        let mut inner = self.inner.lock();
        inner.open = false;
        inner.topics.clear();
        inner
            .connections
            .drain()
            .map(|(_, entry)| entry.handle)
            .collect()
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let inner = self.inner.lock();
        for (topic, ids) in &inner.topics {
            assert!(!ids.is_empty(), "empty bucket for {topic}");
            for id in ids {
                let entry = inner.connections.get(id).expect("subscriber not registered");
                assert!(entry.topics.contains(topic), "{id} missing reverse {topic}");
            }
        }
        for (id, entry) in &inner.connections {
            for topic in &entry.topics {
                assert!(
                    inner.topics.get(topic).is_some_and(|ids| ids.contains(id)),
                    "{topic} missing reverse {id}"
                );
            }
        }
    }
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self::new(RegistryLimits::default())
    }
}

fn remove_from_bucket(
    topics: &mut HashMap<Topic, HashSet<ConnectionId>>,
    topic: &Topic,
    id: &ConnectionId,
) {
    if let Some(bucket) = topics.get_mut(topic) {
        let _ = bucket.remove(id);
        if bucket.is_empty() {
            let _ = topics.remove(topic);
        }
    }
}
