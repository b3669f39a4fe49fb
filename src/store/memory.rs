//! In-memory store, for single-process deployments and tests.

use super::{ChangeLogStore, LockStore, NamespaceLock, StoreResult};
use crate::core::{ChangeEvent, Topic};
use crate::error::StoreError;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Default)]
struct ChangeLogInner {
    last_sequence: i64,
    events: BTreeMap<i64, ChangeEvent>,
    by_topic: HashMap<Topic, BTreeSet<i64>>,
}

/// Change log and lock table held in process memory.
///
/// Sequences start at 1 and are never reused, even after pruning. The lock
/// table enforces uniqueness per namespace the same way a database index
/// would.
#[derive(Default)]
pub struct MemoryStore {
    log: RwLock<ChangeLogInner>,
    locks: DashMap<i64, NamespaceLock>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events currently retained.
    pub fn event_count(&self) -> usize {
        self.log.read().events.len()
    }
}

impl ChangeLogStore for MemoryStore {
    fn append(&self, topic: &Topic) -> StoreResult<ChangeEvent> {
        let mut log = self.log.write();
        log.last_sequence += 1;
        let event = ChangeEvent {
            sequence: log.last_sequence,
            topic: topic.clone(),
            created_at: Utc::now(),
        };
        log.events.insert(event.sequence, event.clone());
        log.by_topic
            .entry(topic.clone())
            .or_default()
            .insert(event.sequence);
        Ok(event)
    }

    fn find(&self, sequence: i64) -> StoreResult<Option<ChangeEvent>> {
        Ok(self.log.read().events.get(&sequence).cloned())
    }

    fn latest_by_topics(&self, topics: &[Topic]) -> StoreResult<Vec<ChangeEvent>> {
        let log = self.log.read();
        let latest = topics
            .iter()
            .filter_map(|topic| log.by_topic.get(topic)?.last())
            .filter_map(|sequence| log.events.get(sequence).cloned())
            .collect();
        Ok(latest)
    }

    fn older_than(
        &self,
        topic: &Topic,
        before: i64,
        limit: usize,
    ) -> StoreResult<Vec<ChangeEvent>> {
        let log = self.log.read();
        let Some(sequences) = log.by_topic.get(topic) else {
            return Ok(Vec::new());
        };
        Ok(sequences
            .range(..before)
            .take(limit)
            .filter_map(|sequence| log.events.get(sequence).cloned())
            .collect())
    }

    fn delete(&self, sequences: &[i64]) -> StoreResult<usize> {
        let mut log = self.log.write();
        let mut removed = 0;
        for sequence in sequences {
            let Some(event) = log.events.remove(sequence) else {
                continue;
            };
            removed += 1;
            let emptied = match log.by_topic.get_mut(&event.topic) {
                Some(bucket) => {
                    bucket.remove(sequence);
                    bucket.is_empty()
                }
                None => false,
            };
            if emptied {
                log.by_topic.remove(&event.topic);
            }
        }
        Ok(removed)
    }

    fn scan_after(&self, after: i64, limit: usize) -> StoreResult<Vec<ChangeEvent>> {
        let log = self.log.read();
        Ok(log
            .events
            .range(after + 1..)
            .take(limit)
            .map(|(_, event)| event.clone())
            .collect())
    }

    fn max_sequence(&self) -> StoreResult<i64> {
        Ok(self.log.read().last_sequence)
    }
}

impl LockStore for MemoryStore {
    fn try_lock(&self, lock: &NamespaceLock) -> StoreResult<()> {
        match self.locks.entry(lock.namespace_id) {
            Entry::Occupied(_) => Err(StoreError::UniqueViolation(format!(
                "namespace_id {} already locked",
                lock.namespace_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(lock.clone());
                Ok(())
            }
        }
    }

    fn find_lock(&self, namespace_id: i64) -> StoreResult<Option<NamespaceLock>> {
        Ok(self.locks.get(&namespace_id).map(|lock| lock.clone()))
    }

    fn unlock(&self, namespace_id: i64) -> StoreResult<bool> {
        Ok(self.locks.remove(&namespace_id).is_some())
    }
}
