//! Change events and the notification wire types built from them.

use super::Topic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A "something changed" record in the change log.
///
/// Only the highest-sequence event per topic carries meaning; older events for
/// the same topic are redundant and get pruned in the background.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Store-assigned, monotonically increasing sequence
    pub sequence: i64,
    /// Topic that changed
    pub topic: Topic,
    /// When the event was appended
    pub created_at: DateTime<Utc>,
}

/// Something interested in change events as they are discovered.
///
/// Implementations must be cheap and must not block; heavy work should be
/// handed off to a worker.
pub trait ChangeListener: Send + Sync {
    /// Called once per newly observed event, in sequence order.
    fn on_change(&self, event: &ChangeEvent);
}

/// One namespace a client is watching, with the last sequence it has seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchedNamespace {
    /// Namespace name as spelled by the client
    pub namespace: String,
    /// Highest sequence the client has observed for it
    pub last_sequence: i64,
}

impl WatchedNamespace {
    /// Create a watched namespace entry.
    pub fn new(namespace: impl Into<String>, last_sequence: i64) -> Self {
        Self {
            namespace: namespace.into(),
            last_sequence,
        }
    }
}

/// Long-poll result entry telling a client that a namespace changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Namespace name, in the spelling the client used
    pub namespace: String,
    /// Highest sequence across the namespace's topics
    pub sequence: i64,
    /// Latest sequence per contributing topic
    #[serde(default)]
    pub per_topic_sequences: BTreeMap<String, i64>,
}

impl Notification {
    /// Create a notification without per-topic detail.
    pub fn new(namespace: impl Into<String>, sequence: i64) -> Self {
        Self {
            namespace: namespace.into(),
            sequence,
            per_topic_sequences: BTreeMap::new(),
        }
    }

    /// Record the latest sequence observed for one topic.
    pub fn with_topic(mut self, topic: &Topic, sequence: i64) -> Self {
        self.per_topic_sequences
            .insert(topic.as_str().to_string(), sequence);
        self
    }
}
