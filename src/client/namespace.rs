//! One namespace's resolved configuration.

use super::change::{ConfigChangeEvent, changed_keys, effective_changes};
use super::disk::DiskSnapshotStore;
use super::listeners::{ListenerHandle, ListenerRegistry};
use super::overrides::OverrideSource;
use super::remote::ConfigApi;
use super::snapshot::{ConfigSnapshot, SourceKind};
use crate::core::WatchedNamespace;
use crate::error::{RelayError, Result};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// Collaborators shared by every namespace of one client.
pub(crate) struct ClientContext {
    pub(crate) api: Arc<dyn ConfigApi>,
    pub(crate) disk: Option<DiskSnapshotStore>,
    pub(crate) overrides: Vec<Arc<dyn OverrideSource>>,
    pub(crate) bundled: HashMap<String, BTreeMap<String, String>>,
    pub(crate) defaults: HashMap<String, BTreeMap<String, String>>,
    pub(crate) max_retries: u32,
    pub(crate) retry_interval: Duration,
}

impl ClientContext {
    fn override_value(&self, key: &str) -> Option<String> {
        self.overrides.iter().find_map(|source| source.get(key))
    }

    /// Fetch with bounded retries; only transient failures are retried and
    /// the pause doubles after each attempt.
    async fn fetch_remote(&self, namespace: &str) -> Result<BTreeMap<String, String>> {
        let attempts = self.max_retries.max(1);
        let mut pause = self.retry_interval;
        let mut attempt = 1;
        loop {
            match self.api.fetch(namespace).await {
                Ok(properties) => return Ok(properties),
                Err(err) if attempt < attempts && err.is_transient() => {
                    debug!(namespace, attempt, error = %err, "Config fetch failed, retrying");
                    tokio::time::sleep(pause).await;
                    pause = pause.saturating_mul(2);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn persist(&self, namespace: &str, properties: &BTreeMap<String, String>) {
        let Some(disk) = self.disk.clone() else {
            return;
        };
        let name = namespace.to_string();
        let snapshot = properties.clone();
        match tokio::task::spawn_blocking(move || disk.persist(&name, &snapshot)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(namespace, error = %err, "Failed to persist config snapshot"),
            Err(err) => warn!(namespace, error = %err, "Config snapshot task failed"),
        }
    }

    /// First non-remote tier that has the namespace.
    fn fallback(&self, namespace: &str) -> Option<(BTreeMap<String, String>, SourceKind)> {
        if let Some(disk) = &self.disk {
            match disk.load(namespace) {
                Ok(Some(properties)) => return Some((properties, SourceKind::Disk)),
                Ok(None) => {}
                Err(err) => warn!(namespace, error = %err, "Failed to read config snapshot"),
            }
        }
        if let Some(properties) = self.bundled.get(namespace) {
            return Some((properties.clone(), SourceKind::Bundled));
        }
        self.defaults
            .get(namespace)
            .map(|properties| (properties.clone(), SourceKind::None))
    }
}

/// Live configuration of one namespace.
///
/// Reads consult the override sources first, then the current snapshot.
/// The snapshot is swapped atomically on every successful refresh and
/// listeners receive one event per refresh listing every key whose
/// effective value changed.
///
/// # Examples
///
/// ```rust,no_run
/// use hotswap_relay::client::ConfigClient;
/// use hotswap_relay::settings::ClientSettings;
///
/// # async fn example() -> hotswap_relay::error::Result<()> {
/// let client = ConfigClient::builder(ClientSettings::for_tenant("shop")).build().await?;
/// let config = client.namespace("application").await?;
///
/// let timeout = config.get_or("timeout", "30");
/// let _handle = config.subscribe(|event| {
///     if event.is_changed("timeout") {
///         println!("timeout changed");
///     }
/// });
/// # Ok(())
/// # }
/// ```
pub struct NamespaceConfig {
    namespace: String,
    snapshot: ArcSwap<ConfigSnapshot>,
    update: Mutex<()>,
    /// Held from fetch to apply so refreshes land in the order they started.
    sync: AsyncMutex<()>,
    listeners: ListenerRegistry,
    context: Arc<ClientContext>,
}

impl NamespaceConfig {
    /// Resolve the initial snapshot through the tiers.
    pub(crate) async fn load(namespace: &str, context: Arc<ClientContext>) -> Result<Self> {
        let (properties, source) = match context.fetch_remote(namespace).await {
            Ok(properties) => {
                context.persist(namespace, &properties).await;
                (properties, SourceKind::Remote)
            }
            Err(err) => {
                warn!(namespace, error = %err, "Remote config unavailable, falling back");
                context
                    .fallback(namespace)
                    .ok_or_else(|| RelayError::NoConfigAvailable {
                        namespace: namespace.to_string(),
                    })?
            }
        };

        info!(namespace, source = ?source, keys = properties.len(), "Loaded namespace config");
        Ok(Self {
            namespace: namespace.to_string(),
            snapshot: ArcSwap::from_pointee(ConfigSnapshot::new(namespace, properties, source)),
            update: Mutex::new(()),
            sync: AsyncMutex::new(()),
            listeners: ListenerRegistry::new(),
            context,
        })
    }

    /// Namespace name.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Effective value of `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.context
            .override_value(key)
            .or_else(|| self.snapshot.load().properties.get(key).cloned())
    }

    /// Effective value of `key`, or `default`.
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Keys present in the current snapshot.
    pub fn property_names(&self) -> Vec<String> {
        self.snapshot.load().properties.keys().cloned().collect()
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.snapshot.load_full()
    }

    /// Register a change listener.
    pub fn subscribe<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&ConfigChangeEvent) + Send + Sync + 'static,
    {
        self.listeners.subscribe(callback)
    }

    /// Re-fetch from the config service and apply the result.
    ///
    /// Returns whether any effective value changed.
    ///
    /// # Errors
    ///
    /// Returns the fetch error. The previous snapshot stays in place and is
    /// marked degraded.
    pub async fn refresh(&self) -> Result<bool> {
        let _sync = self.sync.lock().await;
        match self.context.fetch_remote(&self.namespace).await {
            Ok(properties) => {
                self.context.persist(&self.namespace, &properties).await;
                Ok(self.apply(properties, SourceKind::Remote))
            }
            Err(err) => {
                self.mark_degraded();
                Err(err)
            }
        }
    }

    /// Swap in `properties` and notify listeners of effective changes.
    pub(crate) fn apply(&self, properties: BTreeMap<String, String>, source: SourceKind) -> bool {
        let _guard = self.update.lock();
        let previous = self.snapshot.load_full();
        let keys = changed_keys(&previous.properties, &properties);

        let next = Arc::new(ConfigSnapshot {
            namespace: self.namespace.clone(),
            properties,
            source,
            last_notification_sequence: previous.last_notification_sequence,
            degraded: false,
        });
        self.snapshot.store(Arc::clone(&next));

        if keys.is_empty() {
            return false;
        }

        let changes = effective_changes(
            &self.namespace,
            &keys,
            |key| {
                self.context
                    .override_value(key)
                    .or_else(|| previous.properties.get(key).cloned())
            },
            |key| {
                self.context
                    .override_value(key)
                    .or_else(|| next.properties.get(key).cloned())
            },
        );
        if changes.is_empty() {
            debug!(namespace = %self.namespace, "Snapshot changed only under overrides");
            return false;
        }

        info!(
            namespace = %self.namespace,
            changed = changes.len(),
            "Config changed"
        );
        self.listeners.notify_all(&ConfigChangeEvent {
            namespace: self.namespace.clone(),
            changes,
        });
        true
    }

    /// Remember the highest notification sequence seen.
    pub(crate) fn record_notification(&self, sequence: i64) {
        let _guard = self.update.lock();
        let current = self.snapshot.load_full();
        if sequence > current.last_notification_sequence {
            let mut next = (*current).clone();
            next.last_notification_sequence = sequence;
            self.snapshot.store(Arc::new(next));
        }
    }

    fn mark_degraded(&self) {
        let _guard = self.update.lock();
        let current = self.snapshot.load_full();
        if !current.degraded {
            let mut next = (*current).clone();
            next.degraded = true;
            self.snapshot.store(Arc::new(next));
        }
    }

    /// Long-poll entry for this namespace.
    pub(crate) fn watched(&self) -> WatchedNamespace {
        WatchedNamespace::new(
            self.namespace.clone(),
            self.snapshot.load().last_notification_sequence,
        )
    }
}
