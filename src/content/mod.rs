//! Access to namespace items and releases.
//!
//! Items and releases are owned by whatever service edits configuration;
//! this crate only reads them, to decide whether a namespace still differs
//! from its last release and to render config files.

mod memory;

pub use memory::InMemoryContent;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identity of a namespace instance in one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespaceRef {
    /// Storage id, the key of the lock table
    pub id: i64,
    /// Owning tenant
    pub tenant: String,
    /// Cluster (or branch) the instance lives in
    pub cluster: String,
    /// Namespace name
    pub name: String,
}

/// One editable configuration item.
///
/// Items with a blank key are comments or blank lines and never reach a
/// release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Property key
    pub key: String,
    /// Property value
    pub value: String,
}

impl Item {
    /// Create an item.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Whether the item carries a real key.
    pub fn has_key(&self) -> bool {
        !self.key.trim().is_empty()
    }
}

/// Read access to namespaces, their items and their releases.
pub trait NamespaceContent: Send + Sync {
    /// Namespace instance by tenant, cluster and name.
    fn find_namespace(&self, tenant: &str, cluster: &str, name: &str)
    -> Result<Option<NamespaceRef>>;

    /// Namespace instance by id.
    fn find_by_id(&self, namespace_id: i64) -> Result<Option<NamespaceRef>>;

    /// Current (unpublished) items of a namespace.
    fn items(&self, namespace_id: i64) -> Result<Vec<Item>>;

    /// Configuration of the latest active release, if any.
    fn latest_release(&self, namespace_id: i64) -> Result<Option<BTreeMap<String, String>>>;

    /// The namespace a branch inherits from, if `namespace` is a branch.
    fn parent_namespace(&self, namespace: &NamespaceRef) -> Result<Option<NamespaceRef>>;
}
