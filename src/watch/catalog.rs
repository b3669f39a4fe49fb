//! Namespace ownership lookups.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A namespace as registered by its owning tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppNamespace {
    /// Owning tenant
    pub tenant: String,
    /// Canonical namespace name
    pub name: String,
    /// Whether other tenants may consume it
    pub public: bool,
}

impl AppNamespace {
    /// A namespace only its owner reads.
    pub fn private(tenant: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            name: name.into(),
            public: false,
        }
    }

    /// A namespace other tenants may consume.
    pub fn public(tenant: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            name: name.into(),
            public: true,
        }
    }
}

/// Source of namespace ownership.
///
/// Lookups are case-insensitive on the namespace name and return the
/// canonical spelling.
pub trait NamespaceCatalog: Send + Sync {
    /// The namespace `name` registered under `tenant`, if any.
    fn find(&self, tenant: &str, name: &str) -> Option<AppNamespace>;

    /// The public namespace called `name`, whichever tenant owns it.
    fn find_public(&self, name: &str) -> Option<AppNamespace>;
}

/// Catalog held in memory, fed by whatever process owns namespace metadata.
#[derive(Default)]
pub struct InMemoryCatalog {
    owned: RwLock<HashMap<(String, String), AppNamespace>>,
    public: RwLock<HashMap<String, AppNamespace>>,
}

impl InMemoryCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a namespace.
    pub fn register(&self, namespace: AppNamespace) {
        let name_key = namespace.name.to_lowercase();
        if namespace.public {
            self.public.write().insert(name_key.clone(), namespace.clone());
        }
        self.owned
            .write()
            .insert((namespace.tenant.clone(), name_key), namespace);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(self, namespace: AppNamespace) -> Self {
        self.register(namespace);
        self
    }
}

impl NamespaceCatalog for InMemoryCatalog {
    fn find(&self, tenant: &str, name: &str) -> Option<AppNamespace> {
        self.owned
            .read()
            .get(&(tenant.to_string(), name.to_lowercase()))
            .cloned()
    }

    fn find_public(&self, name: &str) -> Option<AppNamespace> {
        self.public.read().get(&name.to_lowercase()).cloned()
    }
}
