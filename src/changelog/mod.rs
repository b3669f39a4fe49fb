//! Change log with background pruning.
//!
//! [`ChangeLog`] wraps a [`ChangeLogStore`] and owns the cleanup worker. Every
//! append offers its own sequence to a bounded queue; the worker deletes older
//! events for the same topic in fixed-size passes. The queue never blocks an
//! append: when it is full the offer is dropped, and the next append on that
//! topic prunes everything older anyway.

use crate::core::{ChangeEvent, Topic};
use crate::error::Result;
use crate::settings::ChangeLogSettings;
use crate::store::{ChangeLogStore, StoreResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Append-only change log shared by writers and the notification path.
///
/// # Examples
///
/// ```rust,no_run
/// use hotswap_relay::changelog::ChangeLog;
/// use hotswap_relay::core::Topic;
/// use hotswap_relay::settings::ChangeLogSettings;
/// use hotswap_relay::store::MemoryStore;
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> hotswap_relay::error::Result<()> {
/// let log = ChangeLog::start(
///     Arc::new(MemoryStore::new()),
///     &ChangeLogSettings::default(),
///     CancellationToken::new(),
/// );
/// let event = log.append(&Topic::new("shop", "default", "application"))?;
/// println!("assigned sequence {}", event.sequence);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ChangeLog {
    store: Arc<dyn ChangeLogStore>,
    cleanup_tx: mpsc::Sender<i64>,
}

impl ChangeLog {
    /// Wrap a store and spawn the pruning worker on the current runtime.
    ///
    /// The worker stops when `shutdown` is cancelled or every handle to the
    /// log has been dropped.
    pub fn start(
        store: Arc<dyn ChangeLogStore>,
        settings: &ChangeLogSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let (cleanup_tx, cleanup_rx) = mpsc::channel(settings.cleanup_queue_capacity.max(1));

        let worker = PruneWorker {
            store: Arc::clone(&store),
            batch_size: settings.prune_batch_size.max(1),
            idle: settings.idle_interval(),
        };
        tokio::spawn(worker.run(cleanup_rx, shutdown));

        Self { store, cleanup_tx }
    }

    /// Record a change for `topic`.
    ///
    /// Returns as soon as the event is durable; pruning happens later.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the append.
    pub fn append(&self, topic: &Topic) -> Result<ChangeEvent> {
        let event = self.store.append(topic)?;
        debug!(topic = %topic, sequence = event.sequence, "Appended change event");

        if let Err(err) = self.cleanup_tx.try_send(event.sequence) {
            debug!(sequence = event.sequence, error = %err, "Cleanup queue rejected offer");
        }
        Ok(event)
    }

    /// Highest-sequence event for each topic that has one.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub fn latest_by_topics(&self, topics: &[Topic]) -> Result<HashMap<Topic, ChangeEvent>> {
        let latest = self.store.latest_by_topics(topics)?;
        Ok(latest
            .into_iter()
            .map(|event| (event.topic.clone(), event))
            .collect())
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn ChangeLogStore> {
        &self.store
    }
}

struct PruneWorker {
    store: Arc<dyn ChangeLogStore>,
    batch_size: usize,
    idle: Duration,
}

impl PruneWorker {
    async fn run(self, mut rx: mpsc::Receiver<i64>, shutdown: CancellationToken) {
        loop {
            let sequence = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(sequence) => sequence,
                    None => break,
                },
            };

            if self.prune(sequence).await.is_err() {
                // One retry after a pause, then leave it to the next append.
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.idle) => {}
                }
                let _ = self.prune(sequence).await;
            }
        }
        debug!("Change log prune worker stopped");
    }

    async fn prune(&self, sequence: i64) -> std::result::Result<(), ()> {
        let store = Arc::clone(&self.store);
        let batch_size = self.batch_size;
        let outcome =
            tokio::task::spawn_blocking(move || prune_older(store.as_ref(), sequence, batch_size))
                .await;

        match outcome {
            Ok(Ok(deleted)) => {
                if deleted > 0 {
                    debug!(sequence, deleted, "Pruned superseded change events");
                }
                Ok(())
            }
            Ok(Err(err)) => {
                warn!(sequence, error = %err, "Failed to prune change log");
                Err(())
            }
            Err(err) => {
                warn!(sequence, error = %err, "Prune task panicked");
                Err(())
            }
        }
    }
}

/// Delete every event on the same topic as `sequence` with a smaller sequence.
///
/// Works in passes of `batch_size` and stops after a short pass. Returns the
/// number of events deleted; an event that has already been pruned is a no-op.
pub fn prune_older(
    store: &dyn ChangeLogStore,
    sequence: i64,
    batch_size: usize,
) -> StoreResult<usize> {
    let Some(event) = store.find(sequence)? else {
        return Ok(0);
    };

    let batch_size = batch_size.max(1);
    let mut deleted = 0;
    loop {
        let older = store.older_than(&event.topic, event.sequence, batch_size)?;
        if older.is_empty() {
            break;
        }
        let ids: Vec<i64> = older.iter().map(|e| e.sequence).collect();
        deleted += store.delete(&ids)?;
        if older.len() < batch_size {
            break;
        }
    }
    Ok(deleted)
}
