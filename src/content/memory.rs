//! In-memory namespace content.

use super::{Item, NamespaceContent, NamespaceRef};
use crate::cache::{ConfigFileQuery, ReleaseRenderer};
use crate::core::DEFAULT_CLUSTER;
use crate::error::{RelayError, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Default)]
struct ContentInner {
    next_id: i64,
    namespaces: HashMap<i64, NamespaceRef>,
    parents: HashMap<i64, i64>,
    items: HashMap<i64, Vec<Item>>,
    releases: HashMap<i64, BTreeMap<String, String>>,
}

impl ContentInner {
    fn find(&self, tenant: &str, cluster: &str, name: &str) -> Option<&NamespaceRef> {
        self.namespaces.values().find(|ns| {
            ns.tenant == tenant && ns.cluster == cluster && ns.name.eq_ignore_ascii_case(name)
        })
    }

    fn require(&self, namespace_id: i64) -> Result<&NamespaceRef> {
        self.namespaces
            .get(&namespace_id)
            .ok_or_else(|| RelayError::NamespaceNotFound(format!("id {}", namespace_id)))
    }
}

/// Namespaces, items and releases held in memory.
///
/// Useful for tests and for embedding the relay next to an editor that keeps
/// its state elsewhere. It also renders config files from the latest release,
/// falling back from the requested cluster to the region and then to the
/// default cluster.
#[derive(Default)]
pub struct InMemoryContent {
    inner: RwLock<ContentInner>,
}

impl InMemoryContent {
    /// Create empty content.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a namespace instance and return its reference.
    pub fn create_namespace(&self, tenant: &str, cluster: &str, name: &str) -> NamespaceRef {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.find(tenant, cluster, name) {
            return existing.clone();
        }
        inner.next_id += 1;
        let namespace = NamespaceRef {
            id: inner.next_id,
            tenant: tenant.to_string(),
            cluster: cluster.to_string(),
            name: name.to_string(),
        };
        inner.namespaces.insert(namespace.id, namespace.clone());
        namespace
    }

    /// Create a branch of `parent` living in `branch` and inheriting the
    /// parent's release.
    pub fn create_branch(&self, parent: &NamespaceRef, branch: &str) -> NamespaceRef {
        let child = self.create_namespace(&parent.tenant, branch, &parent.name);
        self.inner.write().parents.insert(child.id, parent.id);
        child
    }

    /// Set (or replace) an item.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace does not exist.
    pub fn set_item(&self, namespace_id: i64, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.write();
        inner.require(namespace_id)?;
        let items = inner.items.entry(namespace_id).or_default();
        match items.iter_mut().find(|item| item.key == key) {
            Some(item) => item.value = value.to_string(),
            None => items.push(Item::new(key, value)),
        }
        Ok(())
    }

    /// Append an item as-is, including comment items with a blank key.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace does not exist.
    pub fn push_item(&self, namespace_id: i64, item: Item) -> Result<()> {
        let mut inner = self.inner.write();
        inner.require(namespace_id)?;
        inner.items.entry(namespace_id).or_default().push(item);
        Ok(())
    }

    /// Remove an item by key, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace does not exist.
    pub fn remove_item(&self, namespace_id: i64, key: &str) -> Result<bool> {
        let mut inner = self.inner.write();
        inner.require(namespace_id)?;
        let items = inner.items.entry(namespace_id).or_default();
        let before = items.len();
        items.retain(|item| item.key != key);
        Ok(items.len() != before)
    }

    /// Publish the current items as the namespace's latest release.
    ///
    /// A branch's release is its parent's latest release overlaid with the
    /// branch's own items. Returns the released configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace does not exist.
    pub fn publish(&self, namespace_id: i64) -> Result<BTreeMap<String, String>> {
        let mut inner = self.inner.write();
        inner.require(namespace_id)?;

        let mut configuration = inner
            .parents
            .get(&namespace_id)
            .and_then(|parent| inner.releases.get(parent))
            .cloned()
            .unwrap_or_default();
        for item in inner.items.get(&namespace_id).into_iter().flatten() {
            if item.has_key() {
                configuration.insert(item.key.clone(), item.value.clone());
            }
        }

        inner.releases.insert(namespace_id, configuration.clone());
        Ok(configuration)
    }
}

impl NamespaceContent for InMemoryContent {
    fn find_namespace(
        &self,
        tenant: &str,
        cluster: &str,
        name: &str,
    ) -> Result<Option<NamespaceRef>> {
        Ok(self.inner.read().find(tenant, cluster, name).cloned())
    }

    fn find_by_id(&self, namespace_id: i64) -> Result<Option<NamespaceRef>> {
        Ok(self.inner.read().namespaces.get(&namespace_id).cloned())
    }

    fn items(&self, namespace_id: i64) -> Result<Vec<Item>> {
        Ok(self
            .inner
            .read()
            .items
            .get(&namespace_id)
            .cloned()
            .unwrap_or_default())
    }

    fn latest_release(&self, namespace_id: i64) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self.inner.read().releases.get(&namespace_id).cloned())
    }

    fn parent_namespace(&self, namespace: &NamespaceRef) -> Result<Option<NamespaceRef>> {
        let inner = self.inner.read();
        Ok(inner
            .parents
            .get(&namespace.id)
            .and_then(|parent| inner.namespaces.get(parent))
            .cloned())
    }
}

impl ReleaseRenderer for InMemoryContent {
    fn render(&self, query: &ConfigFileQuery) -> Result<Option<BTreeMap<String, String>>> {
        let inner = self.inner.read();
        let mut clusters = vec![query.cluster.as_str()];
        if let Some(region) = query.region.as_deref().filter(|r| !r.is_empty()) {
            clusters.push(region);
        }
        clusters.push(DEFAULT_CLUSTER);

        for cluster in clusters {
            let release = inner
                .find(&query.tenant, cluster, &query.namespace)
                .and_then(|ns| inner.releases.get(&ns.id));
            if let Some(release) = release {
                return Ok(Some(release.clone()));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_release_overlays_parent() {
        let content = InMemoryContent::new();
        let parent = content.create_namespace("shop", "default", "application");
        content.set_item(parent.id, "timeout", "30").unwrap();
        content.set_item(parent.id, "retries", "3").unwrap();
        content.publish(parent.id).unwrap();

        let branch = content.create_branch(&parent, "canary");
        content.set_item(branch.id, "timeout", "10").unwrap();
        let released = content.publish(branch.id).unwrap();

        assert_eq!(released["timeout"], "10");
        assert_eq!(released["retries"], "3");
        assert_eq!(content.parent_namespace(&branch).unwrap(), Some(parent));
    }

    #[test]
    fn test_render_falls_back_to_default_cluster() {
        let content = InMemoryContent::new();
        let ns = content.create_namespace("shop", "default", "application");
        content.set_item(ns.id, "timeout", "30").unwrap();
        content.publish(ns.id).unwrap();

        let query = ConfigFileQuery::new("shop", "east", "application");
        let rendered = content.render(&query).unwrap().unwrap();
        assert_eq!(rendered["timeout"], "30");

        let missing = ConfigFileQuery::new("shop", "east", "absent");
        assert!(content.render(&missing).unwrap().is_none());
    }

    #[test]
    fn test_unknown_namespace_is_rejected() {
        let content = InMemoryContent::new();
        assert!(matches!(
            content.set_item(42, "k", "v"),
            Err(RelayError::NamespaceNotFound(_))
        ));
    }
}
