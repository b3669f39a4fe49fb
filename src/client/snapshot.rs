//! Client-side view of one namespace.

use crate::core::INITIAL_SEQUENCE;
use std::collections::BTreeMap;

/// Tier a snapshot was loaded from, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Fetched from a config service
    Remote,
    /// Last-known-good copy on local disk
    Disk,
    /// Shipped with the application
    Bundled,
    /// Caller-supplied default, or nothing at all
    None,
}

/// Properties of one namespace as last resolved by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSnapshot {
    /// Namespace name
    pub namespace: String,
    /// Resolved properties, ordered by key
    pub properties: BTreeMap<String, String>,
    /// Tier the properties came from
    pub source: SourceKind,
    /// Highest notification sequence seen for the namespace
    pub last_notification_sequence: i64,
    /// Set when the latest refresh failed and the properties may be stale
    pub degraded: bool,
}

impl ConfigSnapshot {
    pub(crate) fn new(
        namespace: impl Into<String>,
        properties: BTreeMap<String, String>,
        source: SourceKind,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            properties,
            source,
            last_notification_sequence: INITIAL_SEQUENCE,
            degraded: false,
        }
    }
}
