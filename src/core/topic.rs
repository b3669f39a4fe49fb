//! Topic (watch key) construction and parsing.
//!
//! A topic identifies a notifiable scope as `tenant+cluster+namespace`. Writers
//! compute it when appending to the change log and readers compute it when
//! resolving watch keys, so both sides must go through [`Topic::new`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator joining the parts of a topic.
pub const TOPIC_SEPARATOR: char = '+';

/// Name of the cluster every tenant implicitly has.
pub const DEFAULT_CLUSTER: &str = "default";

/// Name of the namespace every tenant implicitly owns.
pub const DEFAULT_NAMESPACE: &str = "application";

/// Tenant placeholder used by clients that have no tenant of their own.
pub const NO_TENANT_PLACEHOLDER: &str = "__no_tenant__";

/// Sequence reported by clients that have never observed a change.
pub const INITIAL_SEQUENCE: i64 = -1;

/// Deterministic key identifying a notifiable scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Build the topic for a tenant, cluster and namespace.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hotswap_relay::core::Topic;
    ///
    /// let topic = Topic::new("shop", "default", "application");
    /// assert_eq!(topic.as_str(), "shop+default+application");
    /// ```
    pub fn new(tenant: &str, cluster: &str, namespace: &str) -> Self {
        let mut key = String::with_capacity(tenant.len() + cluster.len() + namespace.len() + 2);
        key.push_str(tenant);
        key.push(TOPIC_SEPARATOR);
        key.push_str(cluster);
        key.push(TOPIC_SEPARATOR);
        key.push_str(namespace);
        Self(key)
    }

    /// Wrap an already-joined topic string, e.g. one read back from storage.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The joined topic string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extract the namespace part.
    ///
    /// Empty segments are ignored; anything that does not split into exactly
    /// three parts is not a valid topic and yields `None`.
    pub fn namespace(&self) -> Option<&str> {
        let mut parts = self.0.split(TOPIC_SEPARATOR).filter(|part| !part.is_empty());
        let (_tenant, _cluster, namespace) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }
        Some(namespace)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for Topic {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_namespace_extraction() {
        let topic = Topic::new("shop", "default", "db.yaml");
        assert_eq!(topic.namespace(), Some("db.yaml"));
    }

    #[test]
    fn test_malformed_topics() {
        assert_eq!(Topic::from_raw("shop+default").namespace(), None);
        assert_eq!(Topic::from_raw("a+b+c+d").namespace(), None);
        assert_eq!(Topic::from_raw("").namespace(), None);
        // Empty segments are skipped rather than counted
        assert_eq!(Topic::from_raw("shop++default+app").namespace(), Some("app"));
    }

    proptest! {
        #[test]
        fn writer_and_reader_agree(
            tenant in "[a-zA-Z0-9_.-]{1,16}",
            cluster in "[a-zA-Z0-9_.-]{1,16}",
            namespace in "[a-zA-Z0-9_.-]{1,16}",
        ) {
            let written = Topic::new(&tenant, &cluster, &namespace);
            let read = Topic::from_raw(written.as_str().to_string());
            prop_assert_eq!(&written, &read);
            prop_assert_eq!(read.namespace(), Some(namespace.as_str()));
        }
    }
}
