//! Long-poll registry and wake-up fan-out.

use super::deferred::{DeferredPoll, PollOutcome};
use crate::core::{
    ChangeEvent, ChangeListener, INITIAL_SEQUENCE, Notification, Topic, WatchedNamespace,
};
use crate::error::{RelayError, Result};
use crate::settings::NotificationSettings;
use crate::store::ChangeLogStore;
use crate::watch::{NamespaceNormalizer, WatchKeyResolver, WatchKeys};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[cfg(feature = "metrics")]
use crate::metrics::RelayMetrics;

/// A client's long-poll request.
#[derive(Debug, Clone)]
pub struct PollRequest {
    /// Requesting tenant
    pub tenant: String,
    /// Cluster the client reads from
    pub cluster: String,
    /// Namespaces watched, with the last sequence seen for each
    pub notifications: Vec<WatchedNamespace>,
    /// Optional region (data center)
    pub region: Option<String>,
    /// Client address, for logging
    pub client_ip: Option<String>,
}

impl PollRequest {
    /// A request for `tenant` in `cluster` with no region.
    pub fn new(
        tenant: impl Into<String>,
        cluster: impl Into<String>,
        notifications: Vec<WatchedNamespace>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            cluster: cluster.into(),
            notifications,
            region: None,
            client_ip: None,
        }
    }

    /// Set the region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

struct WakeBatch {
    topic: Topic,
    notification: Notification,
    polls: Vec<Arc<DeferredPoll>>,
}

/// Parks long-poll requests under their watch keys and wakes them when a
/// change event arrives for one of those keys.
///
/// A request is registered under every topic it watches before the store is
/// rechecked, so an event appended between resolution and registration is
/// seen either by the recheck or by [`handle_change`](Self::handle_change).
/// Whichever way a request completes (change, timeout, or the caller
/// dropping the future) it is removed from every bucket it joined.
///
/// # Examples
///
/// ```rust,no_run
/// use hotswap_relay::core::WatchedNamespace;
/// use hotswap_relay::notify::{NotificationHub, PollOutcome, PollRequest};
/// use hotswap_relay::settings::NotificationSettings;
/// use hotswap_relay::store::MemoryStore;
/// use hotswap_relay::watch::{InMemoryCatalog, NamespaceNormalizer, WatchKeyResolver};
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> hotswap_relay::error::Result<()> {
/// let catalog = Arc::new(InMemoryCatalog::new());
/// let hub = NotificationHub::new(
///     WatchKeyResolver::new(catalog.clone()),
///     NamespaceNormalizer::new(catalog),
///     Arc::new(MemoryStore::new()),
///     NotificationSettings::default(),
///     CancellationToken::new(),
/// );
///
/// let request = PollRequest::new("shop", "default", vec![WatchedNamespace::new("application", 5)]);
/// match hub.poll(request).await? {
///     PollOutcome::Changed(notifications) => println!("changed: {:?}", notifications),
///     PollOutcome::NotModified => println!("nothing new"),
/// }
/// # Ok(())
/// # }
/// ```
pub struct NotificationHub {
    buckets: DashMap<Topic, HashMap<u64, Arc<DeferredPoll>>>,
    next_id: AtomicU64,
    resolver: WatchKeyResolver,
    normalizer: NamespaceNormalizer,
    store: Arc<dyn ChangeLogStore>,
    settings: NotificationSettings,
    batch_tx: mpsc::UnboundedSender<WakeBatch>,
    #[cfg(feature = "metrics")]
    metrics: Option<RelayMetrics>,
}

impl NotificationHub {
    /// Create a hub and spawn its batch wake-up worker on the current
    /// runtime. The worker stops when `shutdown` is cancelled.
    pub fn new(
        resolver: WatchKeyResolver,
        normalizer: NamespaceNormalizer,
        store: Arc<dyn ChangeLogStore>,
        settings: NotificationSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_wake_batches(
            batch_rx,
            settings.batch_size.max(1),
            settings.batch_interval(),
            shutdown,
        ));

        Self {
            buckets: DashMap::new(),
            next_id: AtomicU64::new(0),
            resolver,
            normalizer,
            store,
            settings,
            batch_tx,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Record poll and wake-up metrics.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: RelayMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Settings the hub was created with.
    pub fn settings(&self) -> &NotificationSettings {
        &self.settings
    }

    /// Wait until one of the requested namespaces moves past the client's
    /// sequence, or the long-poll horizon elapses.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::BadRequest`] if no entry names a namespace, and
    /// a store error if the recheck query fails. Neither parks the request.
    pub async fn poll(&self, request: PollRequest) -> Result<PollOutcome> {
        let watched = self.filter_notifications(&request.tenant, &request.notifications);
        if watched.is_empty() {
            return Err(RelayError::BadRequest(format!(
                "Invalid format of notifications: {} entries, none naming a namespace",
                request.notifications.len()
            )));
        }

        let namespaces: BTreeSet<String> = watched.keys().cloned().collect();
        let original_names: HashMap<String, String> = watched
            .iter()
            .filter(|(canonical, entry)| **canonical != entry.namespace)
            .map(|(canonical, entry)| (canonical.clone(), entry.namespace.clone()))
            .collect();

        let watch_keys = self.resolver.resolve(
            &request.tenant,
            &request.cluster,
            &namespaces,
            request.region.as_deref(),
        );
        let topics: Vec<Topic> = watch_keys
            .values()
            .flatten()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (deferred, rx) = DeferredPoll::new(id, original_names);
        let deferred = Arc::new(deferred);
        let _registration = self.register(&deferred, topics.clone());
        debug!(
            tenant = %request.tenant,
            cluster = %request.cluster,
            region = ?request.region,
            client_ip = ?request.client_ip,
            topics = topics.len(),
            "Registered long poll"
        );

        let store = Arc::clone(&self.store);
        let lookup = topics.clone();
        let latest: HashMap<Topic, i64> =
            tokio::task::spawn_blocking(move || store.latest_by_topics(&lookup))
                .await
                .map_err(|e| RelayError::Other(format!("Sequence recheck task failed: {}", e)))??
                .into_iter()
                .map(|event| (event.topic, event.sequence))
                .collect();
        let newer = newer_notifications(&watched, &watch_keys, &latest);
        if !newer.is_empty() {
            deferred.fulfill(newer);
        }

        #[cfg(feature = "metrics")]
        let timer = self.metrics.as_ref().map(RelayMetrics::start_poll);

        let outcome = match tokio::time::timeout(self.settings.long_poll_timeout(), rx).await {
            Ok(Ok(notifications)) => PollOutcome::Changed(notifications),
            Ok(Err(_)) => PollOutcome::NotModified,
            Err(_) => {
                debug!(tenant = %request.tenant, topics = topics.len(), "Long poll timed out");
                PollOutcome::NotModified
            }
        };

        #[cfg(feature = "metrics")]
        if let (Some(metrics), Some(timer)) = (&self.metrics, timer) {
            metrics.record_poll_completed(timer, matches!(outcome, PollOutcome::Changed(_)));
        }

        Ok(outcome)
    }

    /// Wake every request parked under the event's topic.
    ///
    /// Above the configured batch size the wake-up is handed to the batch
    /// worker, which pauses between batches; otherwise requests are
    /// fulfilled on the calling thread.
    pub fn handle_change(&self, event: &ChangeEvent) {
        let Some(namespace) = event.topic.namespace() else {
            error!(topic = %event.topic, "Change event has a malformed topic");
            return;
        };

        let polls: Vec<Arc<DeferredPoll>> = match self.buckets.get(&event.topic) {
            Some(bucket) => bucket
                .values()
                .filter(|poll| !poll.is_fulfilled())
                .cloned()
                .collect(),
            None => return,
        };
        if polls.is_empty() {
            return;
        }

        let notification =
            Notification::new(namespace, event.sequence).with_topic(&event.topic, event.sequence);
        let batched = polls.len() > self.settings.batch_size;

        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_wakeups(polls.len(), batched);
        }

        if batched {
            debug!(
                topic = %event.topic,
                clients = polls.len(),
                batch_size = self.settings.batch_size,
                "Handing wake-up to batch worker"
            );
            let batch = WakeBatch {
                topic: event.topic.clone(),
                notification,
                polls,
            };
            if let Err(mpsc::error::SendError(batch)) = self.batch_tx.send(batch) {
                warn!(topic = %batch.topic, "Batch worker stopped, waking synchronously");
                for poll in &batch.polls {
                    poll.fulfill(vec![batch.notification.clone()]);
                }
            }
            return;
        }

        debug!(topic = %event.topic, clients = polls.len(), "Waking parked polls");
        for poll in &polls {
            poll.fulfill(vec![notification.clone()]);
        }
    }

    /// Number of distinct requests currently parked.
    pub fn parked_count(&self) -> usize {
        let mut ids = HashSet::new();
        for bucket in self.buckets.iter() {
            ids.extend(bucket.value().keys().copied());
        }
        ids.len()
    }

    /// Number of topics with at least one parked request.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Drop entries without a namespace, strip file suffixes, normalize, and
    /// keep the smaller sequence when two spellings collide.
    fn filter_notifications(
        &self,
        tenant: &str,
        entries: &[WatchedNamespace],
    ) -> BTreeMap<String, WatchedNamespace> {
        let mut filtered: BTreeMap<String, WatchedNamespace> = BTreeMap::new();
        for entry in entries {
            if entry.namespace.is_empty() {
                continue;
            }
            let original = NamespaceNormalizer::strip_suffix(&entry.namespace);
            let canonical = self.normalizer.normalize(tenant, original);

            let keeps_existing = filtered
                .get(&canonical)
                .is_some_and(|existing| existing.last_sequence < entry.last_sequence);
            if keeps_existing {
                continue;
            }
            filtered.insert(canonical, WatchedNamespace::new(original, entry.last_sequence));
        }
        filtered
    }

    fn register(&self, poll: &Arc<DeferredPoll>, topics: Vec<Topic>) -> Registration<'_> {
        for topic in &topics {
            self.buckets
                .entry(topic.clone())
                .or_insert_with(HashMap::new)
                .insert(poll.id(), Arc::clone(poll));
        }
        Registration {
            buckets: &self.buckets,
            id: poll.id(),
            topics,
        }
    }
}

impl ChangeListener for NotificationHub {
    fn on_change(&self, event: &ChangeEvent) {
        self.handle_change(event);
    }
}

/// Removes a request from every bucket it joined when dropped.
struct Registration<'a> {
    buckets: &'a DashMap<Topic, HashMap<u64, Arc<DeferredPoll>>>,
    id: u64,
    topics: Vec<Topic>,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        for topic in self.topics.drain(..) {
            if let Entry::Occupied(mut bucket) = self.buckets.entry(topic) {
                bucket.get_mut().remove(&self.id);
                if bucket.get().is_empty() {
                    bucket.remove();
                }
            }
        }
    }
}

/// Notifications for every namespace whose newest topic sequence is ahead of
/// what the client reported.
fn newer_notifications(
    watched: &BTreeMap<String, WatchedNamespace>,
    watch_keys: &WatchKeys,
    latest: &HashMap<Topic, i64>,
) -> Vec<Notification> {
    let mut notifications = Vec::new();
    if latest.is_empty() {
        return notifications;
    }

    for (namespace, entry) in watched {
        let Some(topics) = watch_keys.get(namespace) else {
            continue;
        };
        let newest = topics
            .iter()
            .filter_map(|topic| latest.get(topic).copied())
            .fold(INITIAL_SEQUENCE, i64::max);
        if newest <= entry.last_sequence {
            continue;
        }

        let mut notification = Notification::new(namespace.clone(), newest);
        for topic in topics {
            if let Some(sequence) = latest.get(topic) {
                notification = notification.with_topic(topic, *sequence);
            }
        }
        notifications.push(notification);
    }
    notifications
}

async fn run_wake_batches(
    mut rx: mpsc::UnboundedReceiver<WakeBatch>,
    batch_size: usize,
    interval: Duration,
    shutdown: CancellationToken,
) {
    loop {
        let batch = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(batch) => batch,
                None => break,
            },
        };

        debug!(
            topic = %batch.topic,
            clients = batch.polls.len(),
            batch_size,
            "Waking parked polls in batches"
        );
        for (index, poll) in batch.polls.iter().enumerate() {
            if index > 0 && index % batch_size == 0 {
                tokio::time::sleep(interval).await;
            }
            poll.fulfill(vec![batch.notification.clone()]);
        }
    }
    debug!("Wake batch worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreResult};
    use crate::watch::{AppNamespace, InMemoryCatalog};

    fn hub_with(store: Arc<MemoryStore>, catalog: InMemoryCatalog) -> Arc<NotificationHub> {
        let catalog = Arc::new(catalog);
        Arc::new(NotificationHub::new(
            WatchKeyResolver::new(catalog.clone()),
            NamespaceNormalizer::new(catalog),
            store,
            NotificationSettings::default(),
            CancellationToken::new(),
        ))
    }

    async fn wait_parked(hub: &NotificationHub, expected: usize) {
        while hub.parked_count() < expected {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_empty_request_is_rejected() {
        let hub = hub_with(Arc::new(MemoryStore::new()), InMemoryCatalog::new());

        let err = hub
            .poll(PollRequest::new("shop", "default", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::BadRequest(_)));

        let nameless = vec![WatchedNamespace::new("", 1)];
        let err = hub
            .poll(PollRequest::new("shop", "default", nameless))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::BadRequest(_)));
        assert_eq!(hub.parked_count(), 0);
    }

    /// Records the thread every sequence lookup runs on.
    struct ThreadRecordingStore {
        inner: MemoryStore,
        lookup_threads: parking_lot::Mutex<Vec<std::thread::ThreadId>>,
    }

    impl ChangeLogStore for ThreadRecordingStore {
        fn append(&self, topic: &Topic) -> StoreResult<ChangeEvent> {
            self.inner.append(topic)
        }
        fn find(&self, sequence: i64) -> StoreResult<Option<ChangeEvent>> {
            self.inner.find(sequence)
        }
        fn latest_by_topics(&self, topics: &[Topic]) -> StoreResult<Vec<ChangeEvent>> {
            self.lookup_threads.lock().push(std::thread::current().id());
            self.inner.latest_by_topics(topics)
        }
        fn older_than(
            &self,
            topic: &Topic,
            before: i64,
            limit: usize,
        ) -> StoreResult<Vec<ChangeEvent>> {
            self.inner.older_than(topic, before, limit)
        }
        fn delete(&self, sequences: &[i64]) -> StoreResult<usize> {
            self.inner.delete(sequences)
        }
        fn scan_after(&self, after: i64, limit: usize) -> StoreResult<Vec<ChangeEvent>> {
            self.inner.scan_after(after, limit)
        }
        fn max_sequence(&self) -> StoreResult<i64> {
            self.inner.max_sequence()
        }
    }

    #[tokio::test]
    async fn test_recheck_runs_off_the_runtime_thread() {
        let store = Arc::new(ThreadRecordingStore {
            inner: MemoryStore::new(),
            lookup_threads: parking_lot::Mutex::new(Vec::new()),
        });
        store.append(&Topic::new("shop", "default", "application")).unwrap();

        let catalog = Arc::new(InMemoryCatalog::new());
        let hub = NotificationHub::new(
            WatchKeyResolver::new(catalog.clone()),
            NamespaceNormalizer::new(catalog),
            store.clone(),
            NotificationSettings::default(),
            CancellationToken::new(),
        );

        let outcome = hub
            .poll(PollRequest::new(
                "shop",
                "default",
                vec![WatchedNamespace::new("application", INITIAL_SEQUENCE)],
            ))
            .await
            .unwrap();
        assert!(matches!(outcome, PollOutcome::Changed(_)));

        // The test body runs on the single runtime thread.
        let runtime_thread = std::thread::current().id();
        let threads = store.lookup_threads.lock();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], runtime_thread);
    }

    #[tokio::test]
    async fn test_already_newer_returns_without_parking() {
        let store = Arc::new(MemoryStore::new());
        let topic = Topic::new("shop", "default", "application");
        for _ in 0..3 {
            store.append(&topic).unwrap();
        }
        let hub = hub_with(store, InMemoryCatalog::new());

        let outcome = hub
            .poll(PollRequest::new(
                "shop",
                "default",
                vec![WatchedNamespace::new("application", 1)],
            ))
            .await
            .unwrap();

        let expected = Notification::new("application", 3).with_topic(&topic, 3);
        assert_eq!(outcome, PollOutcome::Changed(vec![expected]));
        assert_eq!(hub.bucket_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_with_not_modified() {
        let store = Arc::new(MemoryStore::new());
        store
            .append(&Topic::new("shop", "default", "application"))
            .unwrap();
        let hub = hub_with(store, InMemoryCatalog::new());

        let started = tokio::time::Instant::now();
        let outcome = hub
            .poll(PollRequest::new(
                "shop",
                "default",
                vec![WatchedNamespace::new("application", 1)],
            ))
            .await
            .unwrap();

        assert_eq!(outcome, PollOutcome::NotModified);
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert_eq!(hub.parked_count(), 0);
        assert_eq!(hub.bucket_count(), 0);
    }

    #[tokio::test]
    async fn test_wake_uses_client_spelling() {
        let store = Arc::new(MemoryStore::new());
        let catalog = InMemoryCatalog::new().with(AppNamespace::private("shop", "Datasource"));
        let hub = hub_with(store.clone(), catalog);

        let waiter = tokio::spawn({
            let hub = Arc::clone(&hub);
            async move {
                hub.poll(PollRequest::new(
                    "shop",
                    "default",
                    vec![WatchedNamespace::new("datasource.properties", 4)],
                ))
                .await
            }
        });
        wait_parked(&hub, 1).await;

        let event = store
            .append(&Topic::new("shop", "default", "Datasource"))
            .unwrap();
        hub.handle_change(&event);

        let PollOutcome::Changed(notifications) = waiter.await.unwrap().unwrap() else {
            panic!("expected a change");
        };
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].namespace, "datasource");
        assert_eq!(notifications[0].sequence, event.sequence);
        assert_eq!(hub.parked_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_spellings_keep_smaller_sequence() {
        let store = Arc::new(MemoryStore::new());
        let topic = Topic::new("shop", "default", "application");
        store.append(&topic).unwrap();
        store.append(&topic).unwrap();
        let hub = hub_with(store, InMemoryCatalog::new());

        // "application" has seen 2, "application.properties" only 1; the
        // stale spelling wins and is told about sequence 2.
        let outcome = hub
            .poll(PollRequest::new(
                "shop",
                "default",
                vec![
                    WatchedNamespace::new("application", 2),
                    WatchedNamespace::new("application.properties", 1),
                ],
            ))
            .await
            .unwrap();

        let PollOutcome::Changed(notifications) = outcome else {
            panic!("expected a change");
        };
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].namespace, "application");
        assert_eq!(notifications[0].sequence, 2);
    }

    #[tokio::test]
    async fn test_unrelated_topic_does_not_wake() {
        let store = Arc::new(MemoryStore::new());
        let hub = hub_with(store.clone(), InMemoryCatalog::new());

        let waiter = tokio::spawn({
            let hub = Arc::clone(&hub);
            async move {
                hub.poll(PollRequest::new(
                    "shop",
                    "default",
                    vec![WatchedNamespace::new("application", -1)],
                ))
                .await
            }
        });
        wait_parked(&hub, 1).await;

        let other = store.append(&Topic::new("other", "default", "application")).unwrap();
        hub.handle_change(&other);
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        assert_eq!(hub.parked_count(), 1);

        waiter.abort();
        let _ = waiter.await;
        assert_eq!(hub.parked_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_topic_is_ignored() {
        let hub = hub_with(Arc::new(MemoryStore::new()), InMemoryCatalog::new());
        hub.handle_change(&ChangeEvent {
            sequence: 1,
            topic: Topic::from_raw("not-a-topic"),
            created_at: chrono::Utc::now(),
        });
    }

    #[test]
    fn test_newer_notifications_takes_max_over_topics() {
        let default_topic = Topic::new("shop", "default", "app");
        let east_topic = Topic::new("shop", "east", "app");
        let watched = BTreeMap::from([("app".to_string(), WatchedNamespace::new("app", 5))]);
        let keys = WatchKeys::from([(
            "app".to_string(),
            BTreeSet::from([default_topic.clone(), east_topic.clone()]),
        )]);
        let latest = HashMap::from([(default_topic.clone(), 4), (east_topic.clone(), 9)]);

        let notifications = newer_notifications(&watched, &keys, &latest);
        assert_eq!(
            notifications,
            vec![
                Notification::new("app", 9)
                    .with_topic(&default_topic, 4)
                    .with_topic(&east_topic, 9)
            ]
        );

        let stale = HashMap::from([(default_topic, 5)]);
        assert!(newer_notifications(&watched, &keys, &stale).is_empty());
    }
}
