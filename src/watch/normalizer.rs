//! Mapping client namespace spellings to canonical names.

use super::NamespaceCatalog;
use std::sync::Arc;

const PROPERTIES_SUFFIX: &str = ".properties";

/// Maps client-supplied namespace names to canonical names.
///
/// Clients may add a `.properties` suffix or use a different case than the
/// registered name. Matching happens on the canonical name; callers keep
/// the original spelling to answer with.
#[derive(Clone)]
pub struct NamespaceNormalizer {
    catalog: Arc<dyn NamespaceCatalog>,
}

impl NamespaceNormalizer {
    /// Normalize against the given catalog.
    pub fn new(catalog: Arc<dyn NamespaceCatalog>) -> Self {
        Self { catalog }
    }

    /// Drop a trailing `.properties` (any case).
    pub fn strip_suffix(name: &str) -> &str {
        let split = name.len().saturating_sub(PROPERTIES_SUFFIX.len());
        match name.get(split..) {
            Some(tail) if split > 0 && tail.eq_ignore_ascii_case(PROPERTIES_SUFFIX) => &name[..split],
            _ => name,
        }
    }

    /// Canonical name for `name` as seen by `tenant`.
    ///
    /// Looks up the tenant's own namespaces first, then public ones; an
    /// unknown name is returned as given.
    pub fn normalize(&self, tenant: &str, name: &str) -> String {
        let stripped = Self::strip_suffix(name);
        if let Some(owned) = self.catalog.find(tenant, stripped) {
            return owned.name;
        }
        if let Some(shared) = self.catalog.find_public(stripped) {
            return shared.name;
        }
        stripped.to_string()
    }
}
