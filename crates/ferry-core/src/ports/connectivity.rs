//! ConnectivityMonitor port - reachability of the remote authority.
//!
//! Transitions are published on a `watch` channel instead of callbacks. The
//! queue holds exactly one receiver, consumed by its scheduler task; dropping
//! that receiver on `cleanup()` is the unsubscribe.

use tokio::sync::watch;

pub trait ConnectivityMonitor: Send + Sync {
    /// Current reachability.
    fn is_reachable(&self) -> bool;

    /// Subscribe to reachability transitions. The receiver starts at the current value.
    fn subscribe(&self) -> watch::Receiver<bool>;
}
