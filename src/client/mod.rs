//! Client resolver chain.
//!
//! A [`ConfigClient`] keeps one [`NamespaceConfig`] per namespace the
//! application asked for. Each is resolved through four degrading tiers:
//!
//! 1. the config service (discovered endpoints, bounded retries)
//! 2. the last-known-good snapshot on disk
//! 3. a snapshot bundled with the application
//! 4. a caller-supplied default
//!
//! Once loaded, namespaces are kept current by a long poll against the
//! notification endpoint and by a slower periodic refresh that covers missed
//! notifications.

mod change;
mod disk;
mod listeners;
mod locator;
mod long_poll;
mod namespace;
mod overrides;
mod remote;
mod snapshot;

pub use change::{ConfigChange, ConfigChangeEvent, PropertyChangeType};
pub use disk::DiskSnapshotStore;
pub use listeners::{ListenerHandle, ListenerRegistry};
pub use locator::ServiceLocator;
pub use namespace::NamespaceConfig;
pub use overrides::{EnvOverrides, OverrideSource, StaticOverrides};
pub use remote::{ConfigApi, HttpConfigApi};
pub use snapshot::{ConfigSnapshot, SourceKind};

use crate::core::properties;
use crate::error::{RelayError, Result};
use crate::settings::ClientSettings;
use long_poll::{Backoff, LongPoller, NamespaceRegistry};
use namespace::ClientContext;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Entry point of the client side.
///
/// Background tasks (discovery refresh, long poll, periodic refresh) run on
/// the Tokio runtime the client was built on and stop when the client is
/// shut down or dropped.
///
/// # Examples
///
/// ```rust,no_run
/// use hotswap_relay::client::{ConfigClient, EnvOverrides};
/// use hotswap_relay::settings::ClientSettings;
/// use std::sync::Arc;
///
/// # async fn example() -> hotswap_relay::error::Result<()> {
/// let mut settings = ClientSettings::for_tenant("shop");
/// settings.meta_server = Some("http://meta.internal:8080".to_string());
/// settings.cache_dir = Some("/var/cache/shop".into());
///
/// let client = ConfigClient::builder(settings)
///     .with_override(Arc::new(EnvOverrides::new("SHOP")))
///     .with_bundled("application", "timeout=30\nretries=3\n")
///     .build()
///     .await?;
///
/// let config = client.namespace("application").await?;
/// println!("timeout = {}", config.get_or("timeout", "30"));
/// # Ok(())
/// # }
/// ```
pub struct ConfigClient {
    settings: ClientSettings,
    context: Arc<ClientContext>,
    namespaces: NamespaceRegistry,
    registered: Arc<Notify>,
    locator: Option<Arc<ServiceLocator>>,
    shutdown: CancellationToken,
}

impl ConfigClient {
    /// Start building a client.
    pub fn builder(settings: ClientSettings) -> ConfigClientBuilder {
        ConfigClientBuilder::new(settings)
    }

    /// Settings the client was built with.
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Configuration of `namespace`, loading it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NoConfigAvailable`] if no tier has the namespace.
    pub async fn namespace(&self, namespace: &str) -> Result<Arc<NamespaceConfig>> {
        if let Some(existing) = self.namespaces.read().get(namespace) {
            return Ok(Arc::clone(existing));
        }

        let loaded = Arc::new(NamespaceConfig::load(namespace, Arc::clone(&self.context)).await?);
        let config = Arc::clone(
            self.namespaces
                .write()
                .entry(namespace.to_string())
                .or_insert(loaded),
        );
        self.registered.notify_one();
        Ok(config)
    }

    /// Names of the namespaces loaded so far.
    pub fn namespace_names(&self) -> Vec<String> {
        self.namespaces.read().keys().cloned().collect()
    }

    /// Config service base URLs currently in use; empty when a custom
    /// [`ConfigApi`] was supplied.
    pub fn services(&self) -> Vec<String> {
        self.locator
            .as_ref()
            .map(|locator| locator.services().as_ref().clone())
            .unwrap_or_default()
    }

    /// Re-fetch every loaded namespace now.
    ///
    /// Failures are logged; affected namespaces keep their snapshot.
    pub async fn refresh_all(&self) {
        refresh_all(&self.namespaces).await;
    }

    /// Stop every background task.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for ConfigClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn refresh_all(namespaces: &NamespaceRegistry) {
    let configs: Vec<Arc<NamespaceConfig>> = namespaces.read().values().cloned().collect();
    for config in configs {
        if let Err(err) = config.refresh().await {
            warn!(namespace = %config.namespace(), error = %err, "Periodic refresh failed");
        }
    }
}

/// Builder for a [`ConfigClient`].
pub struct ConfigClientBuilder {
    settings: ClientSettings,
    api: Option<Arc<dyn ConfigApi>>,
    overrides: Vec<Arc<dyn OverrideSource>>,
    bundled: HashMap<String, BTreeMap<String, String>>,
    defaults: HashMap<String, BTreeMap<String, String>>,
}

impl ConfigClientBuilder {
    fn new(settings: ClientSettings) -> Self {
        Self {
            settings,
            api: None,
            overrides: Vec::new(),
            bundled: HashMap::new(),
            defaults: HashMap::new(),
        }
    }

    /// Talk to the config service through `api` instead of HTTP.
    pub fn with_api(mut self, api: Arc<dyn ConfigApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Add an override source; earlier sources win.
    pub fn with_override(mut self, source: Arc<dyn OverrideSource>) -> Self {
        self.overrides.push(source);
        self
    }

    /// Snapshot shipped with the application, as `key=value` text.
    pub fn with_bundled(mut self, namespace: impl Into<String>, text: &str) -> Self {
        self.bundled.insert(namespace.into(), properties::parse(text));
        self
    }

    /// Last-resort properties for `namespace`.
    pub fn with_default(
        mut self,
        namespace: impl Into<String>,
        properties: BTreeMap<String, String>,
    ) -> Self {
        self.defaults.insert(namespace.into(), properties);
        self
    }

    /// Discover config services and start the background tasks.
    ///
    /// A failed discovery is logged, not returned; namespaces then resolve
    /// from the local tiers until a later refresh succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP clients cannot be built.
    pub async fn build(self) -> Result<ConfigClient> {
        let settings = self.settings;
        let shutdown = CancellationToken::new();

        let (api, locator) = match self.api {
            Some(api) => (api, None),
            None => {
                let http = reqwest::Client::builder()
                    .connect_timeout(Duration::from_millis(settings.connect_timeout_ms))
                    .timeout(Duration::from_millis(settings.read_timeout_ms))
                    .build()
                    .map_err(|e| RelayError::Remote(format!("Failed to build HTTP client: {}", e)))?;
                let locator = Arc::new(ServiceLocator::new(&settings, http));
                if let Err(err) = locator.refresh().await {
                    warn!(error = %err, "Initial config service discovery failed");
                }
                Arc::clone(&locator).spawn_refresh(
                    Duration::from_secs(settings.discovery_refresh_interval_secs),
                    shutdown.child_token(),
                );
                let api = HttpConfigApi::new(&settings, Arc::clone(&locator))?;
                (Arc::new(api) as Arc<dyn ConfigApi>, Some(locator))
            }
        };

        let disk = settings.cache_dir.as_ref().map(|dir| {
            DiskSnapshotStore::new(dir.clone(), settings.tenant.clone(), settings.cluster.clone())
        });
        let context = Arc::new(ClientContext {
            api: Arc::clone(&api),
            disk,
            overrides: self.overrides,
            bundled: self.bundled,
            defaults: self.defaults,
            max_retries: settings.max_retries,
            retry_interval: Duration::from_millis(settings.retry_interval_ms),
        });

        let namespaces: NamespaceRegistry = Arc::new(RwLock::new(HashMap::new()));
        let registered = Arc::new(Notify::new());

        let poller = LongPoller {
            api,
            namespaces: Arc::clone(&namespaces),
            registered: Arc::clone(&registered),
            backoff: Backoff::new(
                Duration::from_millis(settings.long_poll_initial_backoff_ms),
                Duration::from_millis(settings.long_poll_max_backoff_ms),
            ),
        };
        tokio::spawn(poller.run(shutdown.child_token()));

        tokio::spawn(run_periodic_refresh(
            Arc::clone(&namespaces),
            Duration::from_secs(settings.refresh_interval_secs.max(1)),
            shutdown.child_token(),
        ));

        info!(
            tenant = %settings.tenant,
            cluster = %settings.cluster,
            "Config client started"
        );

        Ok(ConfigClient {
            settings,
            context,
            namespaces,
            registered,
            locator,
            shutdown,
        })
    }
}

async fn run_periodic_refresh(
    namespaces: NamespaceRegistry,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        refresh_all(&namespaces).await;
    }
}
