//! Builder for constructing ConfigServer instances.

use super::ConfigServer;
use crate::cache::{ConfigFileCache, GrayPolicy, NoGrayRules, ReleaseRenderer};
use crate::changelog::ChangeLog;
use crate::content::{InMemoryContent, NamespaceContent};
use crate::error::Result;
use crate::lock::EditLock;
use crate::notify::{ChangeScanner, NotificationHub};
use crate::settings::RelaySettings;
use crate::store::{ChangeLogStore, LockStore, MemoryStore};
use crate::watch::{InMemoryCatalog, NamespaceCatalog, NamespaceNormalizer, WatchKeyResolver};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[cfg(feature = "metrics")]
use crate::metrics::RelayMetrics;

/// Builder for a [`ConfigServer`].
///
/// Every collaborator is optional; anything left unset falls back to an
/// in-memory implementation, which suits tests and single-process
/// deployments.
///
/// # Examples
///
/// ```rust,no_run
/// use hotswap_relay::content::InMemoryContent;
/// use hotswap_relay::server::ConfigServer;
/// use hotswap_relay::settings::RelaySettings;
/// use hotswap_relay::store::MemoryStore;
/// use std::sync::Arc;
///
/// # async fn example() -> hotswap_relay::error::Result<()> {
/// let server = ConfigServer::builder(RelaySettings::default())
///     .with_store(Arc::new(MemoryStore::new()))
///     .with_content(Arc::new(InMemoryContent::new()))
///     .build()?;
/// server.serve().await?;
/// # Ok(())
/// # }
/// ```
pub struct ConfigServerBuilder {
    settings: RelaySettings,
    catalog: Option<Arc<dyn NamespaceCatalog>>,
    change_store: Option<Arc<dyn ChangeLogStore>>,
    lock_store: Option<Arc<dyn LockStore>>,
    content: Option<Arc<dyn NamespaceContent>>,
    renderer: Option<Arc<dyn ReleaseRenderer>>,
    gray: Option<Arc<dyn GrayPolicy>>,
    #[cfg(feature = "metrics")]
    metrics: Option<RelayMetrics>,
}

impl ConfigServerBuilder {
    pub(super) fn new(settings: RelaySettings) -> Self {
        Self {
            settings,
            catalog: None,
            change_store: None,
            lock_store: None,
            content: None,
            renderer: None,
            gray: None,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Use `catalog` to find which namespaces are public.
    pub fn with_catalog(mut self, catalog: Arc<dyn NamespaceCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Use one backend for both the change log and the lock table.
    pub fn with_store<S>(mut self, store: Arc<S>) -> Self
    where
        S: ChangeLogStore + LockStore + 'static,
    {
        self.change_store = Some(store.clone() as Arc<dyn ChangeLogStore>);
        self.lock_store = Some(store as Arc<dyn LockStore>);
        self
    }

    /// Use `store` for the change log.
    pub fn with_change_store(mut self, store: Arc<dyn ChangeLogStore>) -> Self {
        self.change_store = Some(store);
        self
    }

    /// Use `store` for the namespace lock table.
    pub fn with_lock_store(mut self, store: Arc<dyn LockStore>) -> Self {
        self.lock_store = Some(store);
        self
    }

    /// Read namespaces, items and releases from `content`, which also
    /// renders config files unless [`with_renderer`](Self::with_renderer)
    /// overrides it.
    pub fn with_content<C>(mut self, content: Arc<C>) -> Self
    where
        C: NamespaceContent + ReleaseRenderer + 'static,
    {
        if self.renderer.is_none() {
            self.renderer = Some(content.clone() as Arc<dyn ReleaseRenderer>);
        }
        self.content = Some(content as Arc<dyn NamespaceContent>);
        self
    }

    /// Render config files with `renderer`.
    pub fn with_renderer(mut self, renderer: Arc<dyn ReleaseRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Bypass the file cache for clients matched by `gray`.
    pub fn with_gray_policy(mut self, gray: Arc<dyn GrayPolicy>) -> Self {
        self.gray = Some(gray);
        self
    }

    /// Record OpenTelemetry metrics for polls, wake-ups and the file cache.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: RelayMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Wire the components together and start their background tasks.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the change scanner cannot read the current end of
    /// the change log.
    pub fn build(self) -> Result<ConfigServer> {
        let settings = self.settings;
        let shutdown = CancellationToken::new();

        let fallback_store = Arc::new(MemoryStore::new());
        let change_store = self
            .change_store
            .unwrap_or_else(|| Arc::clone(&fallback_store) as Arc<dyn ChangeLogStore>);
        let lock_store = self
            .lock_store
            .unwrap_or_else(|| fallback_store as Arc<dyn LockStore>);

        let catalog = self
            .catalog
            .unwrap_or_else(|| Arc::new(InMemoryCatalog::new()) as Arc<dyn NamespaceCatalog>);
        let fallback_content = Arc::new(InMemoryContent::new());
        let renderer = self
            .renderer
            .unwrap_or_else(|| Arc::clone(&fallback_content) as Arc<dyn ReleaseRenderer>);
        let content = self
            .content
            .unwrap_or_else(|| fallback_content as Arc<dyn NamespaceContent>);
        let gray = self
            .gray
            .unwrap_or_else(|| Arc::new(NoGrayRules) as Arc<dyn GrayPolicy>);

        let resolver = WatchKeyResolver::new(Arc::clone(&catalog));
        let normalizer = NamespaceNormalizer::new(catalog);

        let change_log = ChangeLog::start(
            Arc::clone(&change_store),
            &settings.change_log,
            shutdown.child_token(),
        );

        let hub = NotificationHub::new(
            resolver.clone(),
            normalizer.clone(),
            Arc::clone(&change_store),
            settings.notification.clone(),
            shutdown.child_token(),
        );
        let cache = ConfigFileCache::new(&settings.cache, normalizer, resolver, gray, renderer);

        #[cfg(feature = "metrics")]
        let (hub, cache) = match self.metrics {
            Some(metrics) => (hub.with_metrics(metrics.clone()), cache.with_metrics(metrics)),
            None => (hub, cache),
        };

        let hub = Arc::new(hub);
        let cache = Arc::new(cache);

        // Cache first, so a woken client never re-reads a stale entry.
        let scanner = Arc::new(
            ChangeScanner::new(change_store, settings.notification.scan_batch_size)?
                .with_listener(cache.clone())
                .with_listener(hub.clone()),
        );
        Arc::clone(&scanner).spawn(settings.notification.scan_interval(), shutdown.child_token());

        let lock = EditLock::new(lock_store, Arc::clone(&content), &settings.lock);

        info!(
            bind = %settings.server.bind,
            lock_enabled = lock.is_enabled(),
            "Config server assembled"
        );

        Ok(ConfigServer {
            settings,
            change_log,
            hub,
            cache,
            scanner,
            lock,
            content,
            shutdown,
        })
    }
}
