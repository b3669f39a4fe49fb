//! Periodic change-log scanner.

use crate::core::{ChangeEvent, ChangeListener};
use crate::error::Result;
use crate::store::ChangeLogStore;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Reads new events from the change log and hands them to listeners.
///
/// Scanning starts after the highest sequence present when the scanner is
/// created, so history is never replayed. Events are delivered in sequence
/// order; a listener that panics is logged and does not stop delivery to
/// the others.
pub struct ChangeScanner {
    store: Arc<dyn ChangeLogStore>,
    listeners: Vec<Arc<dyn ChangeListener>>,
    last_scanned: AtomicI64,
    batch_size: usize,
}

impl ChangeScanner {
    /// Create a scanner positioned at the current end of the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the current maximum sequence cannot be read.
    pub fn new(store: Arc<dyn ChangeLogStore>, batch_size: usize) -> Result<Self> {
        let start = store.max_sequence()?;
        debug!(start, "Change scanner positioned");
        Ok(Self {
            store,
            listeners: Vec::new(),
            last_scanned: AtomicI64::new(start),
            batch_size: batch_size.max(1),
        })
    }

    /// Add a listener.
    pub fn with_listener(mut self, listener: Arc<dyn ChangeListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Highest sequence delivered so far.
    pub fn last_scanned(&self) -> i64 {
        self.last_scanned.load(Ordering::Acquire)
    }

    /// Deliver every event appended since the last scan.
    ///
    /// Returns the number of events delivered.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails; events delivered before
    /// the failure are not redelivered.
    pub fn scan_once(&self) -> Result<usize> {
        let mut delivered = 0;
        loop {
            let after = self.last_scanned();
            let events = self.store.scan_after(after, self.batch_size)?;
            for event in &events {
                self.dispatch(event);
                self.last_scanned.store(event.sequence, Ordering::Release);
            }
            delivered += events.len();
            if events.len() < self.batch_size {
                break;
            }
        }
        Ok(delivered)
    }

    fn dispatch(&self, event: &ChangeEvent) {
        debug!(topic = %event.topic, sequence = event.sequence, "Dispatching change event");
        for listener in &self.listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_change(event)));
            if outcome.is_err() {
                error!(
                    topic = %event.topic,
                    sequence = event.sequence,
                    "Change listener panicked"
                );
            }
        }
    }

    /// Scan on a fixed interval until `shutdown` is cancelled.
    pub fn spawn(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let scanner = Arc::clone(&self);
                match tokio::task::spawn_blocking(move || scanner.scan_once()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) => warn!(error = %err, "Change scan failed"),
                    Err(err) => error!(error = %err, "Change scan task panicked"),
                }
            }
            debug!("Change scanner stopped");
        })
    }
}
