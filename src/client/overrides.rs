//! Process-level property overrides.
//!
//! An override wins over every tier of the resolver chain, so a key set
//! here never reports a change when the remote value moves underneath it.

use std::collections::HashMap;

/// A higher-priority source consulted before the snapshot.
pub trait OverrideSource: Send + Sync {
    /// Override for `key`, if any.
    fn get(&self, key: &str) -> Option<String>;
}

/// Overrides read from environment variables.
///
/// `db.url` with prefix `APP` is looked up as `APP_DB_URL`: the key is
/// upper-cased and `.` and `-` become `_`.
///
/// # Examples
///
/// ```rust
/// use hotswap_relay::client::{EnvOverrides, OverrideSource};
///
/// let overrides = EnvOverrides::new("APP");
/// assert_eq!(overrides.variable_name("db.max-connections"), "APP_DB_MAX_CONNECTIONS");
/// ```
#[derive(Debug, Clone)]
pub struct EnvOverrides {
    prefix: String,
}

impl EnvOverrides {
    /// Overrides under `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Environment variable consulted for `key`.
    pub fn variable_name(&self, key: &str) -> String {
        let key: String = key
            .chars()
            .map(|ch| match ch {
                '.' | '-' => '_',
                other => other.to_ascii_uppercase(),
            })
            .collect();
        if self.prefix.is_empty() {
            key
        } else {
            format!("{}_{}", self.prefix, key)
        }
    }
}

impl OverrideSource for EnvOverrides {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(self.variable_name(key)).ok()
    }
}

/// Fixed overrides, typically from command-line flags.
#[derive(Debug, Clone, Default)]
pub struct StaticOverrides {
    values: HashMap<String, String>,
}

impl StaticOverrides {
    /// Empty overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an override.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl OverrideSource for StaticOverrides {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_overrides() {
        let overrides = StaticOverrides::new().with("timeout", "5");
        assert_eq!(overrides.get("timeout").as_deref(), Some("5"));
        assert_eq!(overrides.get("retries"), None);
    }

    #[test]
    fn test_env_variable_names() {
        assert_eq!(EnvOverrides::new("").variable_name("db.url"), "DB_URL");
        assert_eq!(
            EnvOverrides::new("RELAY_TEST").variable_name("cache.size"),
            "RELAY_TEST_CACHE_SIZE"
        );
    }
}
