//! Key-by-key change sets dispatched to listeners.

use std::collections::{BTreeMap, BTreeSet};

/// How a property changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyChangeType {
    /// The key did not exist before
    Added,
    /// The key exists on both sides with different values
    Modified,
    /// The key no longer exists
    Deleted,
}

/// One property whose effective value changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChange {
    /// Namespace the property belongs to
    pub namespace: String,
    /// Property key
    pub key: String,
    /// Effective value before the change
    pub old_value: Option<String>,
    /// Effective value after the change
    pub new_value: Option<String>,
    /// Kind of change
    pub change_type: PropertyChangeType,
}

impl ConfigChange {
    fn classify(
        namespace: &str,
        key: &str,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> Option<Self> {
        let change_type = match (&old_value, &new_value) {
            (None, None) => return None,
            (Some(old), Some(new)) if old == new => return None,
            (None, Some(_)) => PropertyChangeType::Added,
            (Some(_), None) => PropertyChangeType::Deleted,
            (Some(_), Some(_)) => PropertyChangeType::Modified,
        };
        Some(Self {
            namespace: namespace.to_string(),
            key: key.to_string(),
            old_value,
            new_value,
            change_type,
        })
    }
}

/// Every effective change produced by one snapshot update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChangeEvent {
    /// Namespace that changed
    pub namespace: String,
    /// Changes keyed by property key
    pub changes: BTreeMap<String, ConfigChange>,
}

impl ConfigChangeEvent {
    /// Keys whose effective value changed.
    pub fn changed_keys(&self) -> impl Iterator<Item = &str> {
        self.changes.keys().map(String::as_str)
    }

    /// Whether `key` changed.
    pub fn is_changed(&self, key: &str) -> bool {
        self.changes.contains_key(key)
    }

    /// The change for `key`, if any.
    pub fn change(&self, key: &str) -> Option<&ConfigChange> {
        self.changes.get(key)
    }
}

/// Keys that differ between two raw property maps.
pub(crate) fn changed_keys(
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
) -> BTreeSet<String> {
    old.keys()
        .chain(new.keys())
        .filter(|key| old.get(*key) != new.get(*key))
        .cloned()
        .collect()
}

/// Build the change set for `keys` from effective-value lookups taken before
/// and after an update.
///
/// Keys whose effective value is the same on both sides are left out, so a
/// key shadowed by an override never shows up as changed.
pub(crate) fn effective_changes(
    namespace: &str,
    keys: &BTreeSet<String>,
    before: impl Fn(&str) -> Option<String>,
    after: impl Fn(&str) -> Option<String>,
) -> BTreeMap<String, ConfigChange> {
    keys.iter()
        .filter_map(|key| {
            ConfigChange::classify(namespace, key, before(key), after(key))
                .map(|change| (key.clone(), change))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_changed_keys_covers_all_three_kinds() {
        let old = map(&[("kept", "1"), ("modified", "a"), ("deleted", "x")]);
        let new = map(&[("kept", "1"), ("modified", "b"), ("added", "y")]);

        let keys = changed_keys(&old, &new);
        assert_eq!(
            keys.into_iter().collect::<Vec<_>>(),
            vec!["added", "deleted", "modified"]
        );
    }

    #[test]
    fn test_effective_changes_classify() {
        let old = map(&[("modified", "a"), ("deleted", "x")]);
        let new = map(&[("modified", "b"), ("added", "y")]);
        let keys = changed_keys(&old, &new);

        let changes = effective_changes(
            "application",
            &keys,
            |key| old.get(key).cloned(),
            |key| new.get(key).cloned(),
        );

        assert_eq!(changes["added"].change_type, PropertyChangeType::Added);
        assert_eq!(changes["modified"].change_type, PropertyChangeType::Modified);
        assert_eq!(changes["deleted"].change_type, PropertyChangeType::Deleted);
        assert_eq!(changes["deleted"].new_value, None);
    }

    #[test]
    fn test_overridden_key_is_not_reported() {
        let old = map(&[("timeout", "30")]);
        let new = map(&[("timeout", "60")]);
        let keys = changed_keys(&old, &new);

        let overridden = |_key: &str| Some("5".to_string());
        let changes = effective_changes("application", &keys, overridden, overridden);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_deleted_key_falling_back_to_override_is_modified() {
        let old = map(&[("timeout", "30")]);
        let new = BTreeMap::new();
        let keys = changed_keys(&old, &new);

        let changes = effective_changes(
            "application",
            &keys,
            |key| old.get(key).cloned(),
            |_| Some("5".to_string()),
        );
        assert_eq!(changes["timeout"].change_type, PropertyChangeType::Modified);
        assert_eq!(changes["timeout"].new_value.as_deref(), Some("5"));
    }
}
