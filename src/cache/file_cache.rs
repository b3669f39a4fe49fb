//! Weight-bounded config file cache with topic-driven invalidation.

use super::{ConfigFileQuery, GrayPolicy, OutputFormat, ReleaseRenderer};
use crate::core::{ChangeEvent, ChangeListener, TOPIC_SEPARATOR, Topic};
use crate::error::Result;
use crate::settings::CacheSettings;
use crate::watch::{NamespaceNormalizer, WatchKeyResolver};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use moka::notification::RemovalCause;
use moka::sync::Cache;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[cfg(feature = "metrics")]
use crate::metrics::RelayMetrics;

/// Identity of one cached rendering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    format: OutputFormat,
    tenant: String,
    cluster: String,
    namespace: String,
    region: Option<String>,
}

impl CacheKey {
    fn new(format: OutputFormat, query: &ConfigFileQuery) -> Self {
        Self {
            format,
            tenant: query.tenant.clone(),
            cluster: query.cluster.clone(),
            namespace: query.namespace.clone(),
            region: query.region.clone().filter(|region| !region.is_empty()),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}{sep}{}",
            self.format.as_str(),
            self.tenant,
            self.cluster,
            self.namespace,
            sep = TOPIC_SEPARATOR
        )?;
        if let Some(region) = &self.region {
            write!(f, "{}{}", TOPIC_SEPARATOR, region)?;
        }
        Ok(())
    }
}

/// Bidirectional link between topics and the cache keys that depend on them.
#[derive(Default)]
struct TopicIndex {
    topic_to_keys: DashMap<Topic, HashSet<CacheKey>>,
    key_to_topics: DashMap<CacheKey, HashSet<Topic>>,
}

impl TopicIndex {
    fn link(&self, key: &CacheKey, topics: impl IntoIterator<Item = Topic>) {
        let topics: HashSet<Topic> = topics.into_iter().collect();
        for topic in &topics {
            self.topic_to_keys
                .entry(topic.clone())
                .or_insert_with(HashSet::new)
                .insert(key.clone());
        }
        self.key_to_topics
            .entry(key.clone())
            .or_insert_with(HashSet::new)
            .extend(topics);
    }

    fn unlink(&self, key: &CacheKey) {
        let Some((_, topics)) = self.key_to_topics.remove(key) else {
            return;
        };
        for topic in topics {
            if let Entry::Occupied(mut keys) = self.topic_to_keys.entry(topic) {
                keys.get_mut().remove(key);
                if keys.get().is_empty() {
                    keys.remove();
                }
            }
        }
    }

    fn keys_for(&self, topic: &Topic) -> Vec<CacheKey> {
        self.topic_to_keys
            .get(topic)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Cache of rendered config files, invalidated by change events.
///
/// Entries are keyed by format, tenant, cluster, namespace and region, are
/// weighed by byte length, and expire a fixed time after being written. Each
/// entry is linked to the topics its content depends on, so a change event
/// for any of those topics evicts it immediately.
///
/// # Examples
///
/// ```rust,no_run
/// use hotswap_relay::cache::{ConfigFileCache, ConfigFileQuery, NoGrayRules, OutputFormat};
/// # use hotswap_relay::cache::ReleaseRenderer;
/// use hotswap_relay::settings::CacheSettings;
/// use hotswap_relay::watch::{InMemoryCatalog, NamespaceNormalizer, WatchKeyResolver};
/// use std::sync::Arc;
///
/// # fn example(renderer: Arc<dyn ReleaseRenderer>) -> hotswap_relay::error::Result<()> {
/// let catalog = Arc::new(InMemoryCatalog::new());
/// let cache = ConfigFileCache::new(
///     &CacheSettings::default(),
///     NamespaceNormalizer::new(catalog.clone()),
///     WatchKeyResolver::new(catalog),
///     Arc::new(NoGrayRules),
///     renderer,
/// );
///
/// let query = ConfigFileQuery::new("shop", "default", "application.properties");
/// if let Some(body) = cache.query(OutputFormat::Properties, &query)? {
///     println!("{}", body);
/// }
/// # Ok(())
/// # }
/// ```
pub struct ConfigFileCache {
    entries: Cache<CacheKey, Arc<str>>,
    index: Arc<TopicIndex>,
    normalizer: NamespaceNormalizer,
    resolver: WatchKeyResolver,
    gray: Arc<dyn GrayPolicy>,
    renderer: Arc<dyn ReleaseRenderer>,
    #[cfg(feature = "metrics")]
    metrics: Option<RelayMetrics>,
}

impl ConfigFileCache {
    /// Create an empty cache.
    pub fn new(
        settings: &CacheSettings,
        normalizer: NamespaceNormalizer,
        resolver: WatchKeyResolver,
        gray: Arc<dyn GrayPolicy>,
        renderer: Arc<dyn ReleaseRenderer>,
    ) -> Self {
        let index = Arc::new(TopicIndex::default());
        let listener_index = Arc::clone(&index);

        let entries = Cache::builder()
            .max_capacity(settings.max_weight_bytes)
            .weigher(|_key: &CacheKey, value: &Arc<str>| -> u32 {
                u32::try_from(value.len()).unwrap_or(u32::MAX)
            })
            .time_to_live(settings.expire_after_write())
            .eviction_listener(move |key: Arc<CacheKey>, _value, cause| {
                if cause == RemovalCause::Replaced {
                    return;
                }
                debug!(cache_key = %key, ?cause, "Removing config file cache entry");
                listener_index.unlink(&key);
            })
            .build();

        Self {
            entries,
            index,
            normalizer,
            resolver,
            gray,
            renderer,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Record lookup and invalidation metrics.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: RelayMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Rendered config file for `query`, or `None` if the namespace has no
    /// release.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering fails.
    pub fn query(&self, format: OutputFormat, query: &ConfigFileQuery) -> Result<Option<String>> {
        let stripped = NamespaceNormalizer::strip_suffix(&query.namespace);
        let namespace = self.normalizer.normalize(&query.tenant, stripped);
        let query = ConfigFileQuery {
            namespace,
            ..query.clone()
        };
        let client_ip = query.client_ip.as_deref();

        let key = CacheKey::new(format, &query);
        if self
            .gray
            .has_gray_rule(&query.tenant, client_ip, &query.namespace)
        {
            debug!(cache_key = %key, "Gray client bypasses config file cache");
            return self.load(format, &query);
        }

        if let Some(hit) = self.entries.get(&key).filter(|hit| !hit.is_empty()) {
            debug!(cache_key = %key, "Config file cache hit");
            self.record_lookup(true);
            return Ok(Some(hit.to_string()));
        }

        debug!(cache_key = %key, "Config file cache miss");
        self.record_lookup(false);
        let Some(payload) = self.load(format, &query)? else {
            return Ok(None);
        };

        // A gray rule may have appeared while rendering; caching now would
        // serve the wrong variant to everyone.
        if self
            .gray
            .has_gray_rule(&query.tenant, client_ip, &query.namespace)
        {
            debug!(cache_key = %key, "Gray rule appeared during load, not caching");
            return self.load(format, &query);
        }

        // Linked before insertion, so an entry the size bound rejects
        // straight away is unlinked by the eviction listener.
        let topics = self.resolver.resolve_one(
            &query.tenant,
            &query.cluster,
            &query.namespace,
            query.region.as_deref(),
        );
        self.index.link(&key, topics);
        self.entries.insert(key.clone(), Arc::from(payload.as_str()));
        debug!(cache_key = %key, "Cached config file");

        Ok(Some(payload))
    }

    /// Evict every entry linked to `topic`, returning how many were linked.
    pub fn invalidate_topic(&self, topic: &Topic) -> usize {
        let keys = self.index.keys_for(topic);
        for key in &keys {
            debug!(cache_key = %key, topic = %topic, "Invalidating config file cache entry");
            self.entries.invalidate(key);
            self.index.unlink(key);
        }

        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_invalidations(keys.len());
        }
        keys.len()
    }

    /// Number of cached entries, after pending maintenance has run.
    pub fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    /// Number of topics with at least one linked entry.
    pub fn indexed_topic_count(&self) -> usize {
        self.index.topic_to_keys.len()
    }

    /// Run pending expiry and eviction work now.
    pub fn run_pending_tasks(&self) {
        self.entries.run_pending_tasks();
    }

    fn load(&self, format: OutputFormat, query: &ConfigFileQuery) -> Result<Option<String>> {
        match self.renderer.render(query)? {
            Some(items) => format.render(&items).map(Some),
            None => Ok(None),
        }
    }

    #[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
    fn record_lookup(&self, hit: bool) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_lookup(hit);
        }
    }
}

impl ChangeListener for ConfigFileCache {
    fn on_change(&self, event: &ChangeEvent) {
        self.invalidate_topic(&event.topic);
    }
}
