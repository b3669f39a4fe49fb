//! Background long-poll loop.

use super::namespace::NamespaceConfig;
use super::remote::ConfigApi;
use crate::core::{Notification, WatchedNamespace};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(crate) type NamespaceRegistry = Arc<RwLock<HashMap<String, Arc<NamespaceConfig>>>>;

/// Exponential back-off between failed polls.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    /// Delay to wait now; doubles the next one up to the ceiling.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Keeps one long poll open for every registered namespace and refreshes
/// the namespaces the server reports as changed.
pub(crate) struct LongPoller {
    pub(crate) api: Arc<dyn ConfigApi>,
    pub(crate) namespaces: NamespaceRegistry,
    pub(crate) registered: Arc<Notify>,
    pub(crate) backoff: Backoff,
}

impl LongPoller {
    pub(crate) async fn run(mut self, shutdown: CancellationToken) {
        loop {
            let watched = self.watched();
            if watched.is_empty() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = self.registered.notified() => continue,
                }
            }

            // A newly registered namespace restarts the poll so it is watched too.
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.registered.notified() => {
                    debug!("Namespace registered, restarting long poll");
                    continue;
                }
                outcome = self.api.poll(&watched) => outcome,
            };

            match outcome {
                Ok(Some(notifications)) => {
                    self.backoff.reset();
                    self.apply(notifications).await;
                }
                Ok(None) => self.backoff.reset(),
                Err(err) => {
                    let delay = self.backoff.next_delay();
                    warn!(
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "Long poll failed, backing off"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        info!("Long poll loop stopped");
    }

    fn watched(&self) -> Vec<WatchedNamespace> {
        self.namespaces
            .read()
            .values()
            .map(|config| config.watched())
            .collect()
    }

    async fn apply(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            let config = self.namespaces.read().get(&notification.namespace).cloned();
            let Some(config) = config else {
                debug!(namespace = %notification.namespace, "Notification for unknown namespace");
                continue;
            };

            config.record_notification(notification.sequence);
            if let Err(err) = config.refresh().await {
                warn!(
                    namespace = %notification.namespace,
                    error = %err,
                    "Refresh after notification failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_to_ceiling_and_resets() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(120));
        let delays: Vec<u64> = (0..9).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 64, 120, 120]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }
}
