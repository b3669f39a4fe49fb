//! Watch-key resolution.

use super::NamespaceCatalog;
use crate::core::{DEFAULT_CLUSTER, DEFAULT_NAMESPACE, NO_TENANT_PLACEHOLDER, Topic};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Topics a client has to watch, keyed by canonical namespace name.
pub type WatchKeys = BTreeMap<String, BTreeSet<Topic>>;

/// Computes the topics whose changes affect a client's view of a namespace.
///
/// A client in cluster `C` (optionally in region `R`) reading namespace `N`
/// is affected by changes to `N` in its own cluster, in its region, and in
/// the default cluster. When `N` is a shared namespace owned by another
/// tenant, the owner's topics are watched too.
///
/// # Examples
///
/// ```rust
/// use hotswap_relay::watch::{InMemoryCatalog, WatchKeyResolver};
/// use std::collections::BTreeSet;
/// use std::sync::Arc;
///
/// let resolver = WatchKeyResolver::new(Arc::new(InMemoryCatalog::new()));
/// let namespaces = BTreeSet::from(["application".to_string()]);
/// let keys = resolver.resolve("shop", "east", &namespaces, None);
/// assert_eq!(keys["application"].len(), 2);
/// ```
#[derive(Clone)]
pub struct WatchKeyResolver {
    catalog: Arc<dyn NamespaceCatalog>,
}

impl WatchKeyResolver {
    /// Resolve against the given ownership catalog.
    pub fn new(catalog: Arc<dyn NamespaceCatalog>) -> Self {
        Self { catalog }
    }

    /// Watch keys for a single namespace.
    pub fn resolve_one(
        &self,
        tenant: &str,
        cluster: &str,
        namespace: &str,
        region: Option<&str>,
    ) -> BTreeSet<Topic> {
        let namespaces = BTreeSet::from([namespace.to_string()]);
        self.resolve(tenant, cluster, &namespaces, region)
            .remove(namespace)
            .unwrap_or_default()
    }

    /// Watch keys for every requested namespace.
    ///
    /// Namespaces that resolve to no topics at all are absent from the
    /// result.
    pub fn resolve(
        &self,
        tenant: &str,
        cluster: &str,
        namespaces: &BTreeSet<String>,
        region: Option<&str>,
    ) -> WatchKeys {
        let mut keys = WatchKeys::new();
        for namespace in namespaces {
            extend(&mut keys, namespace, topics_for(tenant, cluster, namespace, region));
        }

        let only_default =
            namespaces.len() == 1 && namespaces.contains(DEFAULT_NAMESPACE);
        if only_default {
            return keys;
        }

        for namespace in namespaces {
            if self.is_owned_by(tenant, namespace) {
                continue;
            }
            let Some(shared) = self.catalog.find_public(namespace) else {
                continue;
            };
            if shared.tenant == tenant {
                continue;
            }
            let topics = topics_for(&shared.tenant, cluster, &shared.name, region);
            extend(&mut keys, &shared.name, topics);
        }

        keys
    }

    fn is_owned_by(&self, tenant: &str, namespace: &str) -> bool {
        !is_no_tenant(tenant) && self.catalog.find(tenant, namespace).is_some()
    }
}

fn extend(keys: &mut WatchKeys, namespace: &str, topics: BTreeSet<Topic>) {
    if topics.is_empty() {
        return;
    }
    keys.entry(namespace.to_string()).or_default().extend(topics);
}

fn is_no_tenant(tenant: &str) -> bool {
    tenant.eq_ignore_ascii_case(NO_TENANT_PLACEHOLDER)
}

/// The topic set for one tenant/cluster/namespace/region combination.
pub fn topics_for(
    tenant: &str,
    cluster: &str,
    namespace: &str,
    region: Option<&str>,
) -> BTreeSet<Topic> {
    let mut topics = BTreeSet::new();
    if is_no_tenant(tenant) {
        return topics;
    }

    if cluster != DEFAULT_CLUSTER {
        topics.insert(Topic::new(tenant, cluster, namespace));
    }
    if let Some(region) = region.filter(|r| !r.is_empty() && *r != cluster) {
        topics.insert(Topic::new(tenant, region, namespace));
    }
    topics.insert(Topic::new(tenant, DEFAULT_CLUSTER, namespace));
    topics
}
