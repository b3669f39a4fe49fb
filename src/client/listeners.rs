//! Change listener registry for one namespace.

use super::change::ConfigChangeEvent;
use parking_lot::RwLock;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::error;

type Listener = Arc<dyn Fn(&ConfigChangeEvent) + Send + Sync>;

/// Handle for a listener that can be dropped to unsubscribe.
///
/// When the handle is dropped, the listener is removed immediately.
pub struct ListenerHandle {
    id: usize,
    registry: Arc<RwLock<ListenerRegistryInner>>,
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        let id = self.id;
        self.registry
            .write()
            .listeners
            .retain(|(listener_id, _)| *listener_id != id);
    }
}

#[derive(Default)]
struct ListenerRegistryInner {
    listeners: Vec<(usize, Listener)>,
    next_id: usize,
}

/// Registry of callbacks invoked with each effective change set.
///
/// # Examples
///
/// ```rust
/// use hotswap_relay::client::ListenerRegistry;
///
/// let registry = ListenerRegistry::new();
/// let handle = registry.subscribe(|event| {
///     for key in event.changed_keys() {
///         println!("{} changed", key);
///     }
/// });
/// assert_eq!(registry.listener_count(), 1);
///
/// // Unsubscribe by dropping the handle
/// drop(handle);
/// assert_eq!(registry.listener_count(), 0);
/// ```
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    inner: Arc<RwLock<ListenerRegistryInner>>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback`; it stays registered while the returned handle
    /// is alive.
    pub fn subscribe<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&ConfigChangeEvent) + Send + Sync + 'static,
    {
        let mut inner = self.inner.write();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.push((id, Arc::new(callback)));

        ListenerHandle {
            id,
            registry: Arc::clone(&self.inner),
        }
    }

    /// Call every listener, in subscription order, with `event`.
    ///
    /// A panicking listener is logged and skipped.
    pub fn notify_all(&self, event: &ConfigChangeEvent) {
        // Snapshot so listeners may subscribe or unsubscribe from inside the callback.
        let listeners: Vec<Listener> = self
            .inner
            .read()
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!(namespace = %event.namespace, "Config change listener panicked");
            }
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.read().listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event() -> ConfigChangeEvent {
        ConfigChangeEvent {
            namespace: "application".to_string(),
            changes: BTreeMap::new(),
        }
    }

    #[test]
    fn test_subscribe_and_notify() {
        let registry = ListenerRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let counter_clone = Arc::clone(&counter);
        let _handle = registry.subscribe(move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        registry.notify_all(&event());
        registry.notify_all(&event());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let registry = ListenerRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let counter_clone = Arc::clone(&counter);
        let handle = registry.subscribe(move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });
        drop(handle);

        registry.notify_all(&event());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(registry.listener_count(), 0);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let registry = ListenerRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let _bad = registry.subscribe(|_| panic!("listener failure"));
        let counter_clone = Arc::clone(&counter);
        let _good = registry.subscribe(move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        registry.notify_all(&event());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
