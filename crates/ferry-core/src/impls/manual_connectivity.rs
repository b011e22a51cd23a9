//! ManualConnectivity - a ConnectivityMonitor driven by whoever holds it.
//!
//! Used by tests and the demo binary. Platform integrations (network
//! reachability APIs, health pings) feed `set_reachable` from their own task.

use tokio::sync::watch;

use crate::ports::ConnectivityMonitor;

#[derive(Debug)]
pub struct ManualConnectivity {
    tx: watch::Sender<bool>,
}

impl ManualConnectivity {
    /// Start with the given reachability.
    pub fn new(reachable: bool) -> Self {
        let (tx, _rx) = watch::channel(reachable);
        Self { tx }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn offline() -> Self {
        Self::new(false)
    }

    /// Publish a new reachability value. Subscribers only wake on an actual change.
    pub fn set_reachable(&self, reachable: bool) {
        self.tx.send_if_modified(|current| {
            if *current == reachable {
                return false;
            }
            *current = reachable;
            true
        });
    }

    /// Live receivers. Drops to zero once the queue is cleaned up.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl ConnectivityMonitor for ManualConnectivity {
    fn is_reachable(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let monitor = ManualConnectivity::offline();
        let mut rx = monitor.subscribe();
        assert!(!*rx.borrow_and_update());

        monitor.set_reachable(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        assert!(monitor.is_reachable());
    }

    #[tokio::test]
    async fn setting_same_value_does_not_notify() {
        let monitor = ManualConnectivity::online();
        let mut rx = monitor.subscribe();
        rx.borrow_and_update();

        monitor.set_reachable(true);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn dropping_receiver_unsubscribes() {
        let monitor = ManualConnectivity::online();
        let rx = monitor.subscribe();
        assert_eq!(monitor.subscriber_count(), 1);
        drop(rx);
        assert_eq!(monitor.subscriber_count(), 0);
    }
}
