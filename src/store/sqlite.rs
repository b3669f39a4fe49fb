//! SQLite-backed store.
//!
//! The lock table carries a `UNIQUE` index on `namespace_id`, which is the
//! only thing that keeps two editors on different processes from both
//! taking the same namespace.

use super::{ChangeLogStore, LockStore, NamespaceLock, StoreResult};
use crate::core::{ChangeEvent, Topic};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params, params_from_iter};
use std::path::Path;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS change_log (
    sequence   INTEGER PRIMARY KEY AUTOINCREMENT,
    topic      TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_change_log_topic ON change_log (topic, sequence);
CREATE TABLE IF NOT EXISTS namespace_lock (
    namespace_id INTEGER NOT NULL,
    owner        TEXT NOT NULL,
    created_at   TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS uk_namespace_lock ON namespace_lock (namespace_id);
"#;

/// Change log and lock table in a SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(map_err)?;
        Self::with_connection(conn)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(map_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA).map_err(map_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn map_err(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            StoreError::UniqueViolation(err.to_string())
        }
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen
            ) =>
        {
            StoreError::Unavailable(err.to_string())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

fn parse_timestamp(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn event_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChangeEvent> {
    let created_at: String = row.get(2)?;
    Ok(ChangeEvent {
        sequence: row.get(0)?,
        topic: Topic::from_raw(row.get::<_, String>(1)?),
        created_at: parse_timestamp(&created_at)?,
    })
}

impl ChangeLogStore for SqliteStore {
    fn append(&self, topic: &Topic) -> StoreResult<ChangeEvent> {
        let conn = self.conn.lock();
        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO change_log (topic, created_at) VALUES (?1, ?2)",
            params![topic.as_str(), created_at.to_rfc3339()],
        )
        .map_err(map_err)?;
        Ok(ChangeEvent {
            sequence: conn.last_insert_rowid(),
            topic: topic.clone(),
            created_at,
        })
    }

    fn find(&self, sequence: i64) -> StoreResult<Option<ChangeEvent>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT sequence, topic, created_at FROM change_log WHERE sequence = ?1",
            params![sequence],
            event_from_row,
        )
        .optional()
        .map_err(map_err)
    }

    fn latest_by_topics(&self, topics: &[Topic]) -> StoreResult<Vec<ChangeEvent>> {
        if topics.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; topics.len()].join(", ");
        let sql = format!(
            "SELECT c.sequence, c.topic, c.created_at FROM change_log c \
             JOIN (SELECT MAX(sequence) AS latest FROM change_log \
                   WHERE topic IN ({placeholders}) GROUP BY topic) m \
             ON c.sequence = m.latest"
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).map_err(map_err)?;
        let rows = stmt
            .query_map(params_from_iter(topics.iter().map(Topic::as_str)), event_from_row)
            .map_err(map_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_err)
    }

    fn older_than(
        &self,
        topic: &Topic,
        before: i64,
        limit: usize,
    ) -> StoreResult<Vec<ChangeEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT sequence, topic, created_at FROM change_log \
                 WHERE topic = ?1 AND sequence < ?2 ORDER BY sequence ASC LIMIT ?3",
            )
            .map_err(map_err)?;
        let rows = stmt
            .query_map(params![topic.as_str(), before, limit as i64], event_from_row)
            .map_err(map_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_err)
    }

    fn delete(&self, sequences: &[i64]) -> StoreResult<usize> {
        if sequences.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; sequences.len()].join(", ");
        let conn = self.conn.lock();
        conn.execute(
            &format!("DELETE FROM change_log WHERE sequence IN ({placeholders})"),
            params_from_iter(sequences.iter()),
        )
        .map_err(map_err)
    }

    fn scan_after(&self, after: i64, limit: usize) -> StoreResult<Vec<ChangeEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT sequence, topic, created_at FROM change_log \
                 WHERE sequence > ?1 ORDER BY sequence ASC LIMIT ?2",
            )
            .map_err(map_err)?;
        let rows = stmt
            .query_map(params![after, limit as i64], event_from_row)
            .map_err(map_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_err)
    }

    fn max_sequence(&self) -> StoreResult<i64> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COALESCE(MAX(sequence), 0) FROM change_log",
            [],
            |row| row.get(0),
        )
        .map_err(map_err)
    }
}

impl LockStore for SqliteStore {
    fn try_lock(&self, lock: &NamespaceLock) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO namespace_lock (namespace_id, owner, created_at) VALUES (?1, ?2, ?3)",
            params![lock.namespace_id, lock.owner, lock.created_at.to_rfc3339()],
        )
        .map_err(map_err)?;
        Ok(())
    }

    fn find_lock(&self, namespace_id: i64) -> StoreResult<Option<NamespaceLock>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT namespace_id, owner, created_at FROM namespace_lock WHERE namespace_id = ?1",
            params![namespace_id],
            |row| {
                let created_at: String = row.get(2)?;
                Ok(NamespaceLock {
                    namespace_id: row.get(0)?,
                    owner: row.get(1)?,
                    created_at: parse_timestamp(&created_at)?,
                })
            },
        )
        .optional()
        .map_err(map_err)
    }

    fn unlock(&self, namespace_id: i64) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let removed = conn
            .execute(
                "DELETE FROM namespace_lock WHERE namespace_id = ?1",
                params![namespace_id],
            )
            .map_err(map_err)?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_latest() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = Topic::new("shop", "default", "a");
        let b = Topic::new("shop", "default", "b");
        store.append(&a).unwrap();
        let latest_b = store.append(&b).unwrap();
        let latest_a = store.append(&a).unwrap();

        let mut latest = store.latest_by_topics(&[a, b]).unwrap();
        latest.sort_by_key(|e| e.sequence);
        assert_eq!(latest, vec![latest_b, latest_a]);
    }

    #[test]
    fn test_prune_queries() {
        let store = SqliteStore::open_in_memory().unwrap();
        let topic = Topic::new("shop", "default", "application");
        for _ in 0..5 {
            store.append(&topic).unwrap();
        }

        let older = store.older_than(&topic, 5, 10).unwrap();
        assert_eq!(older.len(), 4);
        let ids: Vec<i64> = older.iter().map(|e| e.sequence).collect();
        assert_eq!(store.delete(&ids).unwrap(), 4);
        assert_eq!(store.max_sequence().unwrap(), 5);
        assert_eq!(store.scan_after(0, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_unique_lock_constraint() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::open(temp_dir.path().join("relay.db")).unwrap();

        store.try_lock(&NamespaceLock::new(1, "alice")).unwrap();
        let err = store.try_lock(&NamespaceLock::new(1, "bob")).unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
        assert_eq!(store.find_lock(1).unwrap().unwrap().owner, "alice");
        assert!(store.unlock(1).unwrap());
        assert!(store.find_lock(1).unwrap().is_none());
    }
}
