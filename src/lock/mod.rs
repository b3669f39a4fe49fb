//! Edit lock: one editor per namespace between releases.
//!
//! The first write to a namespace since its last release takes the lock for
//! the writer; writes by anyone else are rejected until the namespace is
//! published or its items are reverted to match the last release. The only
//! exclusion is the lock table's uniqueness constraint, so editors behind
//! different server processes see the same lock.
//!
//! # Examples
//!
//! ```rust,no_run
//! use hotswap_relay::content::InMemoryContent;
//! use hotswap_relay::lock::EditLock;
//! use hotswap_relay::settings::LockSettings;
//! use hotswap_relay::store::MemoryStore;
//! use std::sync::Arc;
//!
//! # fn example() -> hotswap_relay::error::Result<()> {
//! let content = Arc::new(InMemoryContent::new());
//! let namespace = content.create_namespace("shop", "default", "application");
//! let lock = EditLock::new(Arc::new(MemoryStore::new()), content.clone(), &LockSettings::default());
//!
//! lock.with_lock("shop", "default", "application", "alice", || {
//!     content.set_item(namespace.id, "timeout", "30")
//! })?;
//! # Ok(())
//! # }
//! ```

use crate::content::{Item, NamespaceContent, NamespaceRef};
use crate::error::{RelayError, Result, StoreError};
use crate::settings::LockSettings;
use crate::store::{LockStore, NamespaceLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Namespace edit lock backed by a [`LockStore`].
pub struct EditLock {
    store: Arc<dyn LockStore>,
    content: Arc<dyn NamespaceContent>,
    enabled: bool,
}

impl EditLock {
    /// Create the lock. When `settings.enabled` is false every operation is
    /// a no-op.
    pub fn new(
        store: Arc<dyn LockStore>,
        content: Arc<dyn NamespaceContent>,
        settings: &LockSettings,
    ) -> Self {
        Self {
            store,
            content,
            enabled: settings.enabled,
        }
    }

    /// Whether locking is switched on.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Take (or re-enter) the lock on a namespace for `owner`.
    ///
    /// # Errors
    ///
    /// * [`RelayError::NamespaceNotFound`] if the namespace does not exist
    /// * [`RelayError::LockHeld`] if another owner holds the lock
    /// * [`RelayError::LockCheckFailed`] if the lock vanished mid-check
    pub fn acquire(&self, tenant: &str, cluster: &str, namespace: &str, owner: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let namespace = self.resolve(tenant, cluster, namespace)?;
        self.acquire_namespace(&namespace, owner)
    }

    /// [`acquire`](Self::acquire) addressed by namespace id.
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire).
    pub fn acquire_by_id(&self, namespace_id: i64, owner: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let namespace = self.resolve_id(namespace_id)?;
        self.acquire_namespace(&namespace, owner)
    }

    fn acquire_namespace(&self, namespace: &NamespaceRef, owner: &str) -> Result<()> {
        match self.store.try_lock(&NamespaceLock::new(namespace.id, owner)) {
            Ok(()) => {
                debug!(namespace = %namespace.name, namespace_id = namespace.id, owner, "Namespace locked");
                Ok(())
            }
            Err(StoreError::UniqueViolation(_)) => {
                let current = self.store.find_lock(namespace.id)?;
                check_owner(namespace, current, owner)
            }
            Err(err) => {
                warn!(namespace = %namespace.name, error = %err, "Failed to take namespace lock");
                Err(err.into())
            }
        }
    }

    /// Current lock holder of a namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock table cannot be read.
    pub fn owner(&self, namespace_id: i64) -> Result<Option<String>> {
        Ok(self.store.find_lock(namespace_id)?.map(|lock| lock.owner))
    }

    /// Drop the lock unconditionally, as publishing does.
    ///
    /// Returns whether a lock was held.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock table rejects the delete.
    pub fn release(&self, namespace_id: i64) -> Result<bool> {
        if !self.enabled {
            return Ok(false);
        }
        let released = self.store.unlock(namespace_id)?;
        if released {
            debug!(namespace_id, "Namespace unlocked");
        }
        Ok(released)
    }

    /// Drop the lock if the namespace's effective content matches its last
    /// release again. Returns whether the lock was released.
    ///
    /// # Errors
    ///
    /// Returns an error if items, releases or the lock table cannot be read.
    pub fn try_unlock(&self, namespace: &NamespaceRef) -> Result<bool> {
        if !self.enabled {
            return Ok(false);
        }
        if self.is_modified(namespace)? {
            return Ok(false);
        }
        self.release(namespace.id)
    }

    /// Whether the namespace differs from its latest release.
    ///
    /// Without any release, a namespace counts as modified as soon as it has
    /// one item with a real key. Otherwise the release is compared with the
    /// configuration the items would produce; for a branch that starts from
    /// the parent's latest release.
    ///
    /// # Errors
    ///
    /// Returns an error if items or releases cannot be read.
    pub fn is_modified(&self, namespace: &NamespaceRef) -> Result<bool> {
        let items = self.content.items(namespace.id)?;
        let Some(released) = self.content.latest_release(namespace.id)? else {
            return Ok(items.iter().any(Item::has_key));
        };

        let mut effective = match self.content.parent_namespace(namespace)? {
            Some(parent) => self.content.latest_release(parent.id)?.unwrap_or_default(),
            None => BTreeMap::new(),
        };
        for item in items.iter().filter(|item| item.has_key()) {
            effective.insert(item.key.clone(), item.value.clone());
        }

        Ok(released != effective)
    }

    /// Run a non-publish write under the lock.
    ///
    /// The lock is taken before `write` runs. Afterwards, whether `write`
    /// succeeded or not, the lock is dropped if the namespace no longer
    /// differs from its last release.
    ///
    /// # Errors
    ///
    /// Returns the acquire error without running `write`, or the error from
    /// `write` itself.
    pub fn with_lock<T>(
        &self,
        tenant: &str,
        cluster: &str,
        namespace: &str,
        owner: &str,
        write: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        if !self.enabled {
            return write();
        }
        let namespace = self.resolve(tenant, cluster, namespace)?;
        self.guarded(&namespace, owner, write)
    }

    /// [`with_lock`](Self::with_lock) addressed by namespace id.
    ///
    /// # Errors
    ///
    /// Same as [`with_lock`](Self::with_lock).
    pub fn with_lock_by_id<T>(
        &self,
        namespace_id: i64,
        owner: &str,
        write: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        if !self.enabled {
            return write();
        }
        let namespace = self.resolve_id(namespace_id)?;
        self.guarded(&namespace, owner, write)
    }

    fn guarded<T>(
        &self,
        namespace: &NamespaceRef,
        owner: &str,
        write: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        self.acquire_namespace(namespace, owner)?;
        let outcome = write();
        if let Err(err) = self.try_unlock(namespace) {
            warn!(namespace = %namespace.name, error = %err, "Failed to check namespace for unlock");
        }
        outcome
    }

    fn resolve(&self, tenant: &str, cluster: &str, namespace: &str) -> Result<NamespaceRef> {
        self.content
            .find_namespace(tenant, cluster, namespace)?
            .ok_or_else(|| {
                RelayError::NamespaceNotFound(format!("{}+{}+{}", tenant, cluster, namespace))
            })
    }

    fn resolve_id(&self, namespace_id: i64) -> Result<NamespaceRef> {
        self.content
            .find_by_id(namespace_id)?
            .ok_or_else(|| RelayError::NamespaceNotFound(format!("id {}", namespace_id)))
    }
}

fn check_owner(namespace: &NamespaceRef, current: Option<NamespaceLock>, owner: &str) -> Result<()> {
    let Some(current) = current else {
        return Err(RelayError::LockCheckFailed(namespace.name.clone()));
    };
    if current.owner != owner {
        return Err(RelayError::LockHeld {
            namespace: namespace.name.clone(),
            owner: current.owner,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::InMemoryContent;
    use crate::store::MemoryStore;

    struct Fixture {
        content: Arc<InMemoryContent>,
        store: Arc<MemoryStore>,
        lock: EditLock,
        namespace: NamespaceRef,
    }

    fn fixture(enabled: bool) -> Fixture {
        let content = Arc::new(InMemoryContent::new());
        let namespace = content.create_namespace("shop", "default", "application");
        let store = Arc::new(MemoryStore::new());
        let lock = EditLock::new(store.clone(), content.clone(), &LockSettings { enabled });
        Fixture {
            content,
            store,
            lock,
            namespace,
        }
    }

    #[test]
    fn test_reentrant_for_same_owner() {
        let f = fixture(true);
        f.lock.acquire("shop", "default", "application", "alice").unwrap();
        f.lock.acquire("shop", "default", "application", "alice").unwrap();
        f.lock.acquire_by_id(f.namespace.id, "alice").unwrap();
        assert_eq!(f.lock.owner(f.namespace.id).unwrap().as_deref(), Some("alice"));
    }

    #[test]
    fn test_other_owner_is_rejected_by_name() {
        let f = fixture(true);
        f.lock.acquire_by_id(f.namespace.id, "alice").unwrap();

        let err = f
            .lock
            .acquire("shop", "default", "application", "bob")
            .unwrap_err();
        match err {
            RelayError::LockHeld { namespace, owner } => {
                assert_eq!(namespace, "application");
                assert_eq!(owner, "alice");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_release_lets_next_owner_in() {
        let f = fixture(true);
        f.lock.acquire_by_id(f.namespace.id, "alice").unwrap();
        assert!(f.lock.release(f.namespace.id).unwrap());
        f.lock.acquire_by_id(f.namespace.id, "bob").unwrap();
    }

    #[test]
    fn test_unknown_namespace() {
        let f = fixture(true);
        assert!(matches!(
            f.lock.acquire("shop", "default", "missing", "alice"),
            Err(RelayError::NamespaceNotFound(_))
        ));
        assert!(matches!(
            f.lock.acquire_by_id(999, "alice"),
            Err(RelayError::NamespaceNotFound(_))
        ));
    }

    #[test]
    fn test_disabled_lock_is_noop() {
        let f = fixture(false);
        f.lock.acquire("shop", "default", "missing", "alice").unwrap();
        f.lock.acquire_by_id(f.namespace.id, "alice").unwrap();
        f.lock.acquire_by_id(f.namespace.id, "bob").unwrap();
        assert_eq!(f.lock.owner(f.namespace.id).unwrap(), None);
        assert!(!f.lock.release(f.namespace.id).unwrap());
    }

    #[test]
    fn test_unreleased_namespace_modified_only_with_real_keys() {
        let f = fixture(true);
        assert!(!f.lock.is_modified(&f.namespace).unwrap());

        f.content.push_item(f.namespace.id, Item::new("", "")).unwrap();
        f.content.push_item(f.namespace.id, Item::new("   ", "x")).unwrap();
        assert!(!f.lock.is_modified(&f.namespace).unwrap());

        f.content.set_item(f.namespace.id, "timeout", "30").unwrap();
        assert!(f.lock.is_modified(&f.namespace).unwrap());
    }

    #[test]
    fn test_reverting_to_release_unlocks() {
        let f = fixture(true);
        f.content.set_item(f.namespace.id, "timeout", "30").unwrap();
        f.content.publish(f.namespace.id).unwrap();

        f.lock
            .with_lock_by_id(f.namespace.id, "alice", || {
                f.content.set_item(f.namespace.id, "timeout", "60")
            })
            .unwrap();
        assert_eq!(f.lock.owner(f.namespace.id).unwrap().as_deref(), Some("alice"));

        f.lock
            .with_lock_by_id(f.namespace.id, "alice", || {
                f.content.set_item(f.namespace.id, "timeout", "30")
            })
            .unwrap();
        assert_eq!(f.lock.owner(f.namespace.id).unwrap(), None);
    }

    #[test]
    fn test_branch_compares_against_parent_release() {
        let f = fixture(true);
        f.content.set_item(f.namespace.id, "timeout", "30").unwrap();
        f.content.set_item(f.namespace.id, "retries", "3").unwrap();
        f.content.publish(f.namespace.id).unwrap();

        let branch = f.content.create_branch(&f.namespace, "canary");
        f.content.set_item(branch.id, "timeout", "10").unwrap();
        f.content.publish(branch.id).unwrap();
        assert!(!f.lock.is_modified(&branch).unwrap());

        f.content.set_item(branch.id, "timeout", "20").unwrap();
        assert!(f.lock.is_modified(&branch).unwrap());
    }

    #[test]
    fn test_failed_write_still_checks_unlock() {
        let f = fixture(true);
        let result: Result<()> = f.lock.with_lock_by_id(f.namespace.id, "alice", || {
            Err(RelayError::Other("write failed".into()))
        });
        assert!(result.is_err());
        // Nothing changed, so the lock taken for the write is gone again.
        assert_eq!(f.lock.owner(f.namespace.id).unwrap(), None);
        assert!(f.store.find_lock(f.namespace.id).unwrap().is_none());
    }

    #[test]
    fn test_vanished_lock_is_retryable() {
        let namespace = NamespaceRef {
            id: 1,
            tenant: "shop".into(),
            cluster: "default".into(),
            name: "application".into(),
        };
        assert!(matches!(
            check_owner(&namespace, None, "alice"),
            Err(RelayError::LockCheckFailed(_))
        ));
    }
}
