//! Typed settings for the server and client, loaded with the `config` crate.
//!
//! Files are merged in the order they are added and environment variables
//! override everything. Every field has a default, so an empty loader yields
//! a usable configuration.
//!
//! ```rust,no_run
//! use hotswap_relay::settings::{RelaySettings, SettingsLoader};
//!
//! # fn example() -> hotswap_relay::error::Result<()> {
//! // RELAY_NOTIFICATION__BATCH_SIZE=200 -> notification.batch_size = 200
//! let settings: RelaySettings = SettingsLoader::new()
//!     .with_file("config/relay.yaml")
//!     .with_env_overrides("RELAY", "__")
//!     .load()?;
//! # Ok(())
//! # }
//! ```

use crate::error::{RelayError, Result};
use config::{Environment, File};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::time::Duration;

/// Loads settings from files and environment variables.
#[derive(Debug, Default)]
pub struct SettingsLoader {
    files: Vec<PathBuf>,
    env: Option<(String, String)>,
}

impl SettingsLoader {
    /// Create a loader with no sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a settings file. Later files override earlier ones.
    ///
    /// Supported formats: YAML (.yaml, .yml), TOML (.toml), JSON (.json)
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    /// Read overrides from environment variables with the given prefix.
    ///
    /// * `prefix` - Prefix for environment variables (e.g., "RELAY")
    /// * `separator` - Separator for nested keys (e.g., "__" for RELAY_CACHE__MAX_WEIGHT_BYTES)
    pub fn with_env_overrides(mut self, prefix: &str, separator: &str) -> Self {
        self.env = Some((prefix.to_string(), separator.to_string()));
        self
    }

    /// Merge all sources and deserialize into `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if a file is missing, has an unsupported extension,
    /// or the merged values do not deserialize into `T`.
    pub fn load<T>(&self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let mut builder = config::Config::builder();

        for path in &self.files {
            validate_extension(path)?;
            if !path.exists() {
                return Err(RelayError::Settings(format!(
                    "Settings file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path.clone()).required(true));
        }

        if let Some((prefix, separator)) = &self.env {
            builder = builder.add_source(
                Environment::with_prefix(prefix)
                    .prefix_separator("_")
                    .separator(separator)
                    .try_parsing(true),
            );
        }

        let merged = builder.build()?;
        merged
            .try_deserialize::<T>()
            .map_err(|e| RelayError::Settings(format!("Failed to deserialize settings: {}", e)))
    }
}

fn validate_extension(path: &std::path::Path) -> Result<()> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .ok_or_else(|| {
            RelayError::Settings(format!(
                "Unable to determine file format for: {}",
                path.display()
            ))
        })?;

    match extension {
        "yaml" | "yml" | "toml" | "json" => Ok(()),
        _ => Err(RelayError::Settings(format!(
            "Unsupported file extension: {}. Supported: .yaml, .yml, .toml, .json",
            extension
        ))),
    }
}

/// Server-side settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Long-poll and wake-up behaviour
    pub notification: NotificationSettings,
    /// Reactive config-file cache
    pub cache: CacheSettings,
    /// Change log pruning
    pub change_log: ChangeLogSettings,
    /// Edit lock switch
    pub lock: LockSettings,
    /// HTTP surface
    pub server: ServerSettings,
}

/// Long-poll and wake-up settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// How long a poll stays parked before answering "not modified"
    pub long_poll_timeout_secs: u64,
    /// Wake-ups above this count are delivered in batches on a worker
    pub batch_size: usize,
    /// Pause between wake-up batches
    pub batch_interval_ms: u64,
    /// How often the scanner looks for new change events
    pub scan_interval_ms: u64,
    /// Maximum events read per scan query
    pub scan_batch_size: usize,
}

impl NotificationSettings {
    /// Long-poll horizon as a `Duration`.
    pub fn long_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.long_poll_timeout_secs)
    }

    /// Batch pause as a `Duration`.
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    /// Scan interval as a `Duration`.
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            long_poll_timeout_secs: 60,
            batch_size: 100,
            batch_interval_ms: 100,
            scan_interval_ms: 1000,
            scan_batch_size: 500,
        }
    }
}

/// Config-file cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Upper bound on the summed byte length of cached payloads
    pub max_weight_bytes: u64,
    /// Entries expire this long after being written
    pub expire_after_write_secs: u64,
}

impl CacheSettings {
    /// Write expiry as a `Duration`.
    pub fn expire_after_write(&self) -> Duration {
        Duration::from_secs(self.expire_after_write_secs)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_weight_bytes: 50 * 1024 * 1024,
            expire_after_write_secs: 30 * 60,
        }
    }
}

/// Change log pruning settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChangeLogSettings {
    /// Capacity of the cleanup queue; appends beyond it skip pruning
    pub cleanup_queue_capacity: usize,
    /// Older same-topic events deleted per pass
    pub prune_batch_size: usize,
    /// Pause after a failed pruning pass
    pub idle_interval_ms: u64,
}

impl ChangeLogSettings {
    /// Idle pause as a `Duration`.
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }
}

impl Default for ChangeLogSettings {
    fn default() -> Self {
        Self {
            cleanup_queue_capacity: 100,
            prune_batch_size: 100,
            idle_interval_ms: 5000,
        }
    }
}

/// Edit lock settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// When false, acquire and release are no-ops
    pub enabled: bool,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind
    pub bind: String,
    /// Serving instances advertised by `/services/config`
    pub instances: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            instances: Vec::new(),
        }
    }
}

/// Client-side settings for the resolver chain.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Tenant whose configuration is consumed
    pub tenant: String,
    /// Cluster to read from
    pub cluster: String,
    /// Optional region (data center)
    pub region: Option<String>,
    /// Address reported to the server for gray-policy evaluation
    pub client_ip: Option<String>,
    /// Meta server used to discover config services
    pub meta_server: Option<String>,
    /// Explicit config service URLs; skips discovery when non-empty
    pub config_services: Vec<String>,
    /// Directory for last-known-good snapshots
    pub cache_dir: Option<PathBuf>,
    /// Periodic re-fetch interval
    pub refresh_interval_secs: u64,
    /// Service discovery refresh interval
    pub discovery_refresh_interval_secs: u64,
    /// Pause between fetch attempts
    pub retry_interval_ms: u64,
    /// Attempts per fetch before falling back
    pub max_retries: u32,
    /// HTTP connect timeout
    pub connect_timeout_ms: u64,
    /// HTTP read timeout for ordinary fetches
    pub read_timeout_ms: u64,
    /// Read timeout for the long-poll request; must exceed the server horizon
    pub long_poll_read_timeout_secs: u64,
    /// First back-off step after a failed long poll
    pub long_poll_initial_backoff_ms: u64,
    /// Back-off ceiling for failed long polls
    pub long_poll_max_backoff_ms: u64,
}

impl ClientSettings {
    /// Settings for a tenant reading the default cluster.
    pub fn for_tenant(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            tenant: crate::core::NO_TENANT_PLACEHOLDER.to_string(),
            cluster: crate::core::DEFAULT_CLUSTER.to_string(),
            region: None,
            client_ip: None,
            meta_server: None,
            config_services: Vec::new(),
            cache_dir: None,
            refresh_interval_secs: 300,
            discovery_refresh_interval_secs: 300,
            retry_interval_ms: 1000,
            max_retries: 2,
            connect_timeout_ms: 1000,
            read_timeout_ms: 5000,
            long_poll_read_timeout_secs: 90,
            long_poll_initial_backoff_ms: 1000,
            long_poll_max_backoff_ms: 120_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_sources() {
        let settings: RelaySettings = SettingsLoader::new().load().unwrap();
        assert_eq!(settings.notification.long_poll_timeout_secs, 60);
        assert_eq!(settings.notification.batch_size, 100);
        assert_eq!(settings.cache.max_weight_bytes, 50 * 1024 * 1024);
        assert_eq!(settings.change_log.prune_batch_size, 100);
        assert!(settings.lock.enabled);
    }

    #[test]
    fn test_yaml_file_overrides_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("relay.yaml");
        fs::write(
            &path,
            r#"
notification:
  batch_size: 250
lock:
  enabled: false
"#,
        )
        .unwrap();

        let settings: RelaySettings = SettingsLoader::new().with_file(&path).load().unwrap();
        assert_eq!(settings.notification.batch_size, 250);
        assert_eq!(settings.notification.batch_interval_ms, 100);
        assert!(!settings.lock.enabled);
    }

    #[test]
    fn test_later_file_wins() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("base.toml");
        let prod = temp_dir.path().join("prod.json");
        fs::write(&base, "[cache]\nexpire_after_write_secs = 10\n").unwrap();
        fs::write(&prod, r#"{"cache": {"expire_after_write_secs": 20}}"#).unwrap();

        let settings: RelaySettings = SettingsLoader::new()
            .with_file(&base)
            .with_file(&prod)
            .load()
            .unwrap();
        assert_eq!(settings.cache.expire_after_write(), Duration::from_secs(20));
    }

    #[test]
    fn test_unsupported_extension() {
        let result: Result<RelaySettings> = SettingsLoader::new().with_file("relay.txt").load();
        assert!(matches!(result, Err(RelayError::Settings(_))));
    }

    #[test]
    fn test_missing_file() {
        let result: Result<RelaySettings> = SettingsLoader::new()
            .with_file("/nonexistent/relay.yaml")
            .load();
        assert!(result.is_err());
    }

    #[test]
    fn test_client_settings_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("client.yaml");
        fs::write(
            &path,
            r#"
tenant: shop
cluster: east
config_services:
  - http://127.0.0.1:8080
"#,
        )
        .unwrap();

        let settings: ClientSettings = SettingsLoader::new().with_file(&path).load().unwrap();
        assert_eq!(settings.tenant, "shop");
        assert_eq!(settings.cluster, "east");
        assert_eq!(settings.config_services, vec!["http://127.0.0.1:8080"]);
        assert_eq!(settings.max_retries, 2);
    }
}
