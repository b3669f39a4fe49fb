//! Single-assignment result slot for a parked long poll.

use crate::core::Notification;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// How a long poll ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// At least one watched namespace moved past the client's sequence
    Changed(Vec<Notification>),
    /// Nothing changed within the long-poll horizon
    NotModified,
}

/// A parked request waiting for its outcome.
///
/// The slot is filled at most once; later fulfilment attempts are ignored.
/// Notifications are renamed back to the client's own spelling on the way
/// out.
pub(crate) struct DeferredPoll {
    id: u64,
    slot: Mutex<Option<oneshot::Sender<Vec<Notification>>>>,
    original_names: HashMap<String, String>,
}

impl DeferredPoll {
    pub(crate) fn new(
        id: u64,
        original_names: HashMap<String, String>,
    ) -> (Self, oneshot::Receiver<Vec<Notification>>) {
        let (tx, rx) = oneshot::channel();
        let poll = Self {
            id,
            slot: Mutex::new(Some(tx)),
            original_names,
        };
        (poll, rx)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Fill the slot. Returns `false` if it was already filled or the
    /// waiting side has gone away.
    pub(crate) fn fulfill(&self, notifications: Vec<Notification>) -> bool {
        let Some(tx) = self.slot.lock().take() else {
            return false;
        };

        let renamed = notifications
            .into_iter()
            .map(|mut notification| {
                if let Some(original) = self.original_names.get(&notification.namespace) {
                    notification.namespace = original.clone();
                }
                notification
            })
            .collect();
        tx.send(renamed).is_ok()
    }

    pub(crate) fn is_fulfilled(&self) -> bool {
        self.slot.lock().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fulfilled_once() {
        let (poll, rx) = DeferredPoll::new(1, HashMap::new());
        assert!(poll.fulfill(vec![Notification::new("app", 7)]));
        assert!(!poll.fulfill(vec![Notification::new("app", 8)]));
        assert!(poll.is_fulfilled());

        let delivered = rx.await.unwrap();
        assert_eq!(delivered, vec![Notification::new("app", 7)]);
    }

    #[tokio::test]
    async fn test_restores_original_spelling() {
        let names = HashMap::from([("Datasource".to_string(), "datasource".to_string())]);
        let (poll, rx) = DeferredPoll::new(1, names);
        poll.fulfill(vec![
            Notification::new("Datasource", 3),
            Notification::new("application", 4),
        ]);

        let delivered = rx.await.unwrap();
        assert_eq!(delivered[0].namespace, "datasource");
        assert_eq!(delivered[1].namespace, "application");
    }

    #[test]
    fn test_dropped_receiver() {
        let (poll, rx) = DeferredPoll::new(1, HashMap::new());
        drop(rx);
        assert!(!poll.fulfill(vec![Notification::new("app", 1)]));
        assert!(poll.is_fulfilled());
    }
}
