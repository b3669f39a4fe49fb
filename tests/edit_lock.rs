//! Edit lock scenarios across editors.

use hotswap_relay::content::{InMemoryContent, NamespaceContent};
use hotswap_relay::error::RelayError;
use hotswap_relay::lock::EditLock;
use hotswap_relay::settings::LockSettings;
use hotswap_relay::store::{LockStore, MemoryStore};
use std::sync::Arc;

fn setup(store: Arc<dyn LockStore>) -> (Arc<InMemoryContent>, EditLock, i64) {
    let content = Arc::new(InMemoryContent::new());
    let namespace = content.create_namespace("shop", "default", "application");
    content.set_item(namespace.id, "timeout", "30").unwrap();
    content.publish(namespace.id).unwrap();

    let lock = EditLock::new(store, content.clone(), &LockSettings::default());
    (content, lock, namespace.id)
}

#[test]
fn test_revert_to_published_value_frees_the_namespace() {
    let (content, lock, id) = setup(Arc::new(MemoryStore::new()));

    // Editor A changes an item and takes the lock.
    lock.with_lock("shop", "default", "application", "alice", || {
        content.set_item(id, "timeout", "60")
    })
    .unwrap();
    assert_eq!(lock.owner(id).unwrap().as_deref(), Some("alice"));

    // Editor B is rejected, naming A.
    let err = lock
        .with_lock("shop", "default", "application", "bob", || {
            content.set_item(id, "timeout", "90")
        })
        .unwrap_err();
    match err {
        RelayError::LockHeld { owner, .. } => assert_eq!(owner, "alice"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(content.items(id).unwrap()[0].value, "60");

    // A reverts to the published value; the lock goes away on its own.
    lock.with_lock("shop", "default", "application", "alice", || {
        content.set_item(id, "timeout", "30")
    })
    .unwrap();
    assert_eq!(lock.owner(id).unwrap(), None);

    // B can now write.
    lock.with_lock("shop", "default", "application", "bob", || {
        content.set_item(id, "timeout", "90")
    })
    .unwrap();
    assert_eq!(lock.owner(id).unwrap().as_deref(), Some("bob"));
}

#[test]
fn test_publish_hands_the_namespace_to_the_next_editor() {
    let (content, lock, id) = setup(Arc::new(MemoryStore::new()));

    lock.acquire_by_id(id, "alice").unwrap();
    lock.acquire_by_id(id, "alice").unwrap();
    assert!(matches!(
        lock.acquire_by_id(id, "bob"),
        Err(RelayError::LockHeld { .. })
    ));

    content.publish(id).unwrap();
    assert!(lock.release(id).unwrap());
    lock.acquire_by_id(id, "bob").unwrap();
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use hotswap_relay::store::SqliteStore;
    use tempfile::TempDir;

    #[test]
    fn test_lock_is_shared_between_processes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("relay.db");

        // Two connections stand in for two server processes.
        let first = Arc::new(SqliteStore::open(&path).unwrap());
        let second = Arc::new(SqliteStore::open(&path).unwrap());

        let (content, lock_a, id) = setup(first);
        let lock_b = EditLock::new(second, content, &LockSettings::default());

        lock_a.acquire_by_id(id, "alice").unwrap();
        match lock_b.acquire_by_id(id, "bob") {
            Err(RelayError::LockHeld { owner, .. }) => assert_eq!(owner, "alice"),
            other => panic!("unexpected result: {other:?}"),
        }

        assert!(lock_a.release(id).unwrap());
        lock_b.acquire_by_id(id, "bob").unwrap();
        assert_eq!(lock_a.owner(id).unwrap().as_deref(), Some("bob"));
    }
}
