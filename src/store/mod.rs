//! Persistence seams for the change log and namespace locks.
//!
//! Both tables are owned by this crate. The traits are synchronous, matching
//! blocking database drivers; async callers move calls onto
//! `spawn_blocking` where latency matters.

mod memory;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use crate::core::{ChangeEvent, Topic};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result type for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Append-only record of change events.
pub trait ChangeLogStore: Send + Sync {
    /// Durably record a new event for `topic` and return it with its
    /// assigned sequence.
    fn append(&self, topic: &Topic) -> StoreResult<ChangeEvent>;

    /// Look up a single event by sequence.
    fn find(&self, sequence: i64) -> StoreResult<Option<ChangeEvent>>;

    /// Highest-sequence event for each of the given topics that has one.
    fn latest_by_topics(&self, topics: &[Topic]) -> StoreResult<Vec<ChangeEvent>>;

    /// Up to `limit` events for `topic` with a sequence below `before`,
    /// oldest first.
    fn older_than(&self, topic: &Topic, before: i64, limit: usize)
    -> StoreResult<Vec<ChangeEvent>>;

    /// Delete events by sequence, returning how many were removed.
    fn delete(&self, sequences: &[i64]) -> StoreResult<usize>;

    /// Up to `limit` events with a sequence above `after`, ascending.
    fn scan_after(&self, after: i64, limit: usize) -> StoreResult<Vec<ChangeEvent>>;

    /// Highest sequence assigned so far, or 0 for an empty log.
    fn max_sequence(&self) -> StoreResult<i64>;
}

/// Row in the namespace-lock table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceLock {
    /// Namespace the lock protects; unique across the table
    pub namespace_id: i64,
    /// Identity of the editor holding the lock
    pub owner: String,
    /// When the lock was taken
    pub created_at: DateTime<Utc>,
}

impl NamespaceLock {
    /// A lock row for `namespace_id` owned by `owner`, stamped now.
    pub fn new(namespace_id: i64, owner: impl Into<String>) -> Self {
        Self {
            namespace_id,
            owner: owner.into(),
            created_at: Utc::now(),
        }
    }
}

/// Namespace-lock table with a uniqueness constraint on `namespace_id`.
pub trait LockStore: Send + Sync {
    /// Insert a lock row. Must fail with [`StoreError::UniqueViolation`]
    /// when a row for the namespace already exists.
    fn try_lock(&self, lock: &NamespaceLock) -> StoreResult<()>;

    /// Current lock row for a namespace.
    fn find_lock(&self, namespace_id: i64) -> StoreResult<Option<NamespaceLock>>;

    /// Remove the lock row, returning whether one existed.
    fn unlock(&self, namespace_id: i64) -> StoreResult<bool>;
}
