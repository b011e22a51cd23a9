//! Processor: runs drain passes over the operation store.
//!
//! One pass = snapshot the store, then walk it in order: skip what is
//! exhausted, backing off, or has no handler; run everything else one at a
//! time. Success removes the operation, failure bumps its attempt count.
//! A failing operation never aborts the pass.
//!
//! Only one pass runs at a time. `try_pass` gives up at once while another
//! pass is draining; `pass` waits its turn. Operations enqueued during a
//! pass are not part of its snapshot and are picked up by the next one.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError};

use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use super::backoff::{BackoffPolicy, Eligibility};
use super::store::OperationStore;
use crate::domain::{Operation, OperationId, QueueEvent};
use crate::ports::{Clock, ConnectivityMonitor, EventSink};
use crate::typed::{DynHandler, HandlerError, HandlerRegistry};

/// Processing loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Draining,
    /// Deliverable work is left; another pass is scheduled.
    ScheduledRetry,
}

/// What a single pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// The pass did not run because the remote was unreachable.
    pub offline: bool,
    /// Connectivity dropped mid-pass; the rest of the snapshot was left alone.
    pub interrupted: bool,
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Operations that hit `max_attempts` during this pass.
    pub exhausted: usize,
    pub skipped_exhausted: usize,
    pub skipped_backoff: usize,
    pub skipped_unregistered: usize,
    /// Handler finished after the operation had been removed.
    pub discarded: usize,
    /// Operations still deliverable (not exhausted) after the pass.
    pub remaining: usize,
    reachable_after: bool,
}

impl PassReport {
    /// Whether the loop should come back after the reschedule interval.
    pub fn needs_retry(&self) -> bool {
        !self.offline && self.reachable_after && self.remaining > 0
    }
}

/// Drains the operation store through the handler registry.
///
/// Shared between the scheduler task and `OfflineQueue::force_process`.
pub struct Processor {
    store: Arc<OperationStore>,
    registry: Arc<HandlerRegistry>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    policy: BackoffPolicy,
    pass_lock: Mutex<()>,
    state: std::sync::Mutex<LoopState>,
    stalled_reported: std::sync::Mutex<HashSet<OperationId>>,
    /// Signals the scheduler to arm a retry after a pass it did not run itself.
    pub(crate) rearm: Notify,
}

impl Processor {
    /// Create a processor. Nothing runs until a pass is requested.
    pub fn new(
        store: Arc<OperationStore>,
        registry: Arc<HandlerRegistry>,
        connectivity: Arc<dyn ConnectivityMonitor>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            store,
            registry,
            connectivity,
            clock,
            events,
            policy,
            pass_lock: Mutex::new(()),
            state: std::sync::Mutex::new(LoopState::Idle),
            stalled_reported: std::sync::Mutex::new(HashSet::new()),
            rearm: Notify::new(),
        }
    }

    /// Backoff policy used for eligibility.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Current loop state, as left by the most recent pass.
    pub fn state(&self) -> LoopState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: LoopState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Run a pass unless one is already draining. Returns `None` without
    /// waiting if the lock is taken.
    pub async fn try_pass(&self) -> Option<PassReport> {
        let Ok(_guard) = self.pass_lock.try_lock() else {
            debug!("pass already in flight");
            return None;
        };
        Some(self.run_pass().await)
    }

    /// Run a pass, waiting for an in-flight one to finish first.
    pub async fn pass(&self) -> PassReport {
        let _guard = self.pass_lock.lock().await;
        self.run_pass().await
    }

    #[cfg(test)]
    pub(crate) async fn hold_pass_lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.pass_lock.lock().await
    }

    async fn run_pass(&self) -> PassReport {
        self.set_state(LoopState::Draining);
        let report = self.drain().await;
        self.set_state(if report.needs_retry() {
            LoopState::ScheduledRetry
        } else {
            LoopState::Idle
        });
        report
    }

    async fn drain(&self) -> PassReport {
        let mut report = PassReport::default();
        if !self.connectivity.is_reachable() {
            debug!("pass skipped: remote unreachable");
            report.offline = true;
            return report;
        }

        if let Err(e) = self.store.flush_if_dirty().await {
            warn!(error = %e, "queue snapshot still not persisted");
        }

        let snapshot = self.store.snapshot().await;
        self.prune_stalled(&snapshot);
        if snapshot.is_empty() {
            report.reachable_after = true;
            return report;
        }
        debug!(count = snapshot.len(), "pass started");

        for op in snapshot {
            if !self.connectivity.is_reachable() {
                info!("connectivity lost mid-pass; leaving the rest for the next pass");
                report.interrupted = true;
                break;
            }

            match self.policy.eligibility(&op, self.clock.now()) {
                Eligibility::Exhausted => {
                    debug!(op_id = %op.id, op_type = %op.op_type, attempts = op.attempts, "skipping exhausted operation");
                    report.skipped_exhausted += 1;
                    continue;
                }
                Eligibility::Backoff { remaining } => {
                    debug!(op_id = %op.id, retry_in = ?remaining, "operation backing off");
                    report.skipped_backoff += 1;
                    continue;
                }
                Eligibility::Ready => {}
            }

            let Some(handler) = self.registry.get(&op.op_type) else {
                report.skipped_unregistered += 1;
                self.report_stalled(&op);
                continue;
            };

            report.attempted += 1;
            debug!(op_id = %op.id, op_type = %op.op_type, attempt = op.attempts + 1, "executing operation");
            match run_handler(handler, op.payload.clone()).await {
                Ok(()) => self.on_success(&op, &mut report).await,
                Err(err) => self.on_failure(&op, err, &mut report).await,
            }
        }

        report.remaining = self.store.deliverable_count().await;
        report.reachable_after = self.connectivity.is_reachable();
        debug!(
            attempted = report.attempted,
            delivered = report.delivered,
            failed = report.failed,
            remaining = report.remaining,
            "pass finished"
        );
        report
    }

    async fn on_success(&self, op: &Operation, report: &mut PassReport) {
        self.forget_stalled(&op.id);
        match self.store.complete(&op.id).await {
            Some(removed) => {
                report.delivered += 1;
                info!(op_id = %op.id, op_type = %op.op_type, "operation delivered");
                self.events.emit(QueueEvent::Delivered {
                    id: op.id,
                    op_type: op.op_type.clone(),
                    attempts: removed.attempts + 1,
                });
            }
            None => self.discard(op, report),
        }
    }

    async fn on_failure(&self, op: &Operation, err: HandlerError, report: &mut PassReport) {
        let failed_at = self.clock.now();
        let Some(updated) = self.store.record_failure(&op.id, failed_at, &err).await else {
            self.discard(op, report);
            return;
        };

        report.failed += 1;
        if updated.is_exhausted() {
            report.exhausted += 1;
            warn!(
                op_id = %op.id,
                op_type = %op.op_type,
                attempts = updated.attempts,
                error = %err,
                "operation failed and exhausted its retries"
            );
            self.events.emit(QueueEvent::Exhausted {
                id: op.id,
                op_type: op.op_type.clone(),
                attempts: updated.attempts,
                error: err.to_string(),
            });
        } else {
            info!(
                op_id = %op.id,
                op_type = %op.op_type,
                attempts = updated.attempts,
                retry_in = ?self.policy.delay(updated.attempts),
                error = %err,
                "operation failed; will retry"
            );
            self.events.emit(QueueEvent::AttemptFailed {
                id: op.id,
                op_type: op.op_type.clone(),
                attempts: updated.attempts,
                error: err.to_string(),
            });
        }
    }

    fn discard(&self, op: &Operation, report: &mut PassReport) {
        report.discarded += 1;
        info!(op_id = %op.id, "operation removed while in flight; outcome discarded");
        self.events.emit(QueueEvent::Discarded {
            id: op.id,
            op_type: op.op_type.clone(),
        });
    }

    /// Warn once per operation, not once per pass.
    fn report_stalled(&self, op: &Operation) {
        let first_time = self
            .stalled_reported
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(op.id);
        if first_time {
            warn!(op_id = %op.id, op_type = %op.op_type, "no handler registered; operation stalled");
            self.events.emit(QueueEvent::Stalled {
                id: op.id,
                op_type: op.op_type.clone(),
            });
        }
    }

    /// Drop stall records of operations no longer queued.
    fn prune_stalled(&self, snapshot: &[Operation]) {
        let queued: HashSet<OperationId> = snapshot.iter().map(|op| op.id).collect();
        self.stalled_reported
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|id| queued.contains(id));
    }

    fn forget_stalled(&self, id: &OperationId) {
        self.stalled_reported
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }
}

/// Run the handler on its own task so a panic counts as a failed attempt
/// instead of taking the processing loop down with it.
async fn run_handler(handler: Arc<dyn DynHandler>, payload: serde_json::Value) -> Result<(), HandlerError> {
    match tokio::spawn(async move { handler.handle_dyn(payload).await }).await {
        Ok(result) => result,
        Err(join_err) => Err(HandlerError::transient(format!("handler panicked: {join_err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{BroadcastEventSink, InMemoryStore, ManualConnectivity};
    use crate::ports::FixedClock;
    use crate::typed::handler_fn;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use ulid::Ulid;

    struct Fixture {
        store: Arc<OperationStore>,
        registry: Arc<HandlerRegistry>,
        connectivity: Arc<ManualConnectivity>,
        clock: FixedClock,
        events: BroadcastEventSink,
        processor: Processor,
    }

    async fn fixture() -> Fixture {
        let durable = Arc::new(InMemoryStore::new());
        let store = Arc::new(OperationStore::load(durable, "ops").await.unwrap());
        let registry = Arc::new(HandlerRegistry::new());
        let connectivity = Arc::new(ManualConnectivity::online());
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
        let events = BroadcastEventSink::new(64);
        let processor = Processor::new(
            store.clone(),
            registry.clone(),
            connectivity.clone(),
            Arc::new(clock.clone()),
            Arc::new(events.clone()),
            BackoffPolicy::default(),
        );
        Fixture {
            store,
            registry,
            connectivity,
            clock,
            events,
            processor,
        }
    }

    impl Fixture {
        async fn add(&self, op_type: &str, max_attempts: u32) -> OperationId {
            let op = Operation::new(
                OperationId::from_ulid(Ulid::new()),
                op_type,
                json!({"n": 1}),
                max_attempts,
                self.clock.now(),
            );
            self.store.insert(op).await.unwrap().id()
        }
    }

    fn counting(calls: Arc<AtomicUsize>, fail: bool) -> impl DynHandler {
        handler_fn(move |_payload| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if fail {
                    Err(HandlerError::transient("503"))
                } else {
                    Ok(())
                }
            }
        })
    }

    #[tokio::test]
    async fn offline_pass_does_nothing() {
        let f = fixture().await;
        let calls = Arc::new(AtomicUsize::new(0));
        f.registry.register_dyn("createTask", Arc::new(counting(calls.clone(), false)));
        f.add("createTask", 3).await;
        f.connectivity.set_reachable(false);

        let report = f.processor.pass().await;
        assert!(report.offline);
        assert!(!report.needs_retry());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.store.len().await, 1);
        assert_eq!(f.processor.state(), LoopState::Idle);
    }

    #[tokio::test]
    async fn success_removes_operation() {
        let f = fixture().await;
        let calls = Arc::new(AtomicUsize::new(0));
        f.registry.register_dyn("createTask", Arc::new(counting(calls.clone(), false)));
        let mut rx = f.events.subscribe();
        let id = f.add("createTask", 3).await;

        let report = f.processor.pass().await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.remaining, 0);
        assert!(f.store.is_empty().await);
        assert_eq!(
            rx.recv().await.unwrap(),
            QueueEvent::Delivered {
                id,
                op_type: "createTask".to_string(),
                attempts: 1
            }
        );
    }

    #[tokio::test]
    async fn failure_isolated_from_other_operations() {
        let f = fixture().await;
        let ok_calls = Arc::new(AtomicUsize::new(0));
        let bad_calls = Arc::new(AtomicUsize::new(0));
        f.registry.register_dyn("bad", Arc::new(counting(bad_calls.clone(), true)));
        f.registry.register_dyn("good", Arc::new(counting(ok_calls.clone(), false)));
        let bad = f.add("bad", 3).await;
        f.add("good", 3).await;

        let report = f.processor.pass().await;
        assert_eq!(report.attempted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 1);
        assert!(report.needs_retry());
        assert_eq!(f.processor.state(), LoopState::ScheduledRetry);

        let left = f.store.snapshot().await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, bad);
        assert_eq!(left[0].attempts, 1);
        assert_eq!(left[0].last_attempt_at, Some(f.clock.now()));
    }

    #[tokio::test]
    async fn backoff_skips_until_delay_elapsed() {
        let f = fixture().await;
        let calls = Arc::new(AtomicUsize::new(0));
        f.registry.register_dyn("createTask", Arc::new(counting(calls.clone(), true)));
        let id = f.add("createTask", 5).await;

        f.processor.pass().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // attempts = 1 -> delay 2s
        f.clock.advance(Duration::from_millis(1999));
        let report = f.processor.pass().await;
        assert_eq!(report.skipped_backoff, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.store.get(&id).await.unwrap().attempts, 1);

        f.clock.advance(Duration::from_millis(1));
        let report = f.processor.pass().await;
        assert_eq!(report.attempted, 1);
        assert_eq!(f.store.get(&id).await.unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn exhausted_operation_is_kept_and_skipped() {
        let f = fixture().await;
        let calls = Arc::new(AtomicUsize::new(0));
        f.registry.register_dyn("createTask", Arc::new(counting(calls.clone(), true)));
        let mut rx = f.events.subscribe();
        let id = f.add("createTask", 2).await;

        f.processor.pass().await;
        f.clock.advance(Duration::from_secs(60));
        let report = f.processor.pass().await;
        assert_eq!(report.exhausted, 1);
        assert!(!report.needs_retry());

        f.clock.advance(Duration::from_secs(3600));
        let report = f.processor.pass().await;
        assert_eq!(report.skipped_exhausted, 1);
        assert_eq!(report.attempted, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(f.store.get(&id).await.unwrap().is_exhausted());

        assert!(matches!(rx.recv().await.unwrap(), QueueEvent::AttemptFailed { attempts: 1, .. }));
        assert!(matches!(rx.recv().await.unwrap(), QueueEvent::Exhausted { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn unregistered_type_stalls_once_and_recovers() {
        let f = fixture().await;
        let mut rx = f.events.subscribe();
        let id = f.add("uploadPhoto", 3).await;

        let first = f.processor.pass().await;
        let second = f.processor.pass().await;
        assert_eq!(first.skipped_unregistered, 1);
        assert_eq!(second.skipped_unregistered, 1);
        assert_eq!(f.store.get(&id).await.unwrap().attempts, 0);

        assert_eq!(
            rx.recv().await.unwrap(),
            QueueEvent::Stalled {
                id,
                op_type: "uploadPhoto".to_string()
            }
        );
        assert!(rx.try_recv().is_err());

        let calls = Arc::new(AtomicUsize::new(0));
        f.registry.register_dyn("uploadPhoto", Arc::new(counting(calls.clone(), false)));
        let third = f.processor.pass().await;
        assert_eq!(third.delivered, 1);
    }

    #[tokio::test]
    async fn panicking_handler_counts_as_failure() {
        let f = fixture().await;
        f.registry.register_dyn(
            "createTask",
            Arc::new(handler_fn(|_payload| async move {
                if true {
                    panic!("handler bug");
                }
                Ok(())
            })),
        );
        let id = f.add("createTask", 3).await;

        let report = f.processor.pass().await;
        assert_eq!(report.failed, 1);
        let op = f.store.get(&id).await.unwrap();
        assert_eq!(op.attempts, 1);
        assert!(op.last_error.unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn removal_during_execution_discards_outcome() {
        let f = fixture().await;
        let store = f.store.clone();
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        {
            let started = started.clone();
            let release = release.clone();
            f.registry.register_dyn(
                "createTask",
                Arc::new(handler_fn(move |_payload| {
                    let started = started.clone();
                    let release = release.clone();
                    async move {
                        started.notify_one();
                        release.notified().await;
                        Err(HandlerError::transient("late failure"))
                    }
                })),
            );
        }
        let id = f.add("createTask", 3).await;

        let pass = f.processor.pass();
        let cancel = async {
            started.notified().await;
            assert!(store.remove(&id).await.unwrap());
            release.notify_one();
        };
        let (report, ()) = tokio::join!(pass, cancel);

        assert_eq!(report.discarded, 1);
        assert_eq!(report.failed, 0);
        assert!(f.store.is_empty().await);
    }

    #[tokio::test]
    async fn connectivity_loss_mid_pass_stops_early() {
        let f = fixture().await;
        let connectivity = f.connectivity.clone();
        f.registry.register_dyn(
            "createTask",
            Arc::new(handler_fn(move |_payload| {
                let connectivity = connectivity.clone();
                async move {
                    connectivity.set_reachable(false);
                    Ok(())
                }
            })),
        );
        f.add("createTask", 3).await;
        f.add("createTask", 3).await;

        let report = f.processor.pass().await;
        assert!(report.interrupted);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.remaining, 1);
        assert!(!report.needs_retry());
    }

    #[tokio::test]
    async fn operation_enqueued_mid_pass_waits_for_next_pass() {
        let f = fixture().await;
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let store = f.store.clone();
            let calls = calls.clone();
            let created_at = f.clock.now();
            f.registry.register_dyn(
                "createTask",
                Arc::new(handler_fn(move |_payload| {
                    let store = store.clone();
                    let first = calls.fetch_add(1, Ordering::SeqCst) == 0;
                    async move {
                        if first {
                            let op = Operation::new(
                                OperationId::from_ulid(Ulid::new()),
                                "createTask",
                                json!({"n": 2}),
                                3,
                                created_at,
                            );
                            if let Err(e) = store.insert(op).await {
                                return Err(HandlerError::transient(e.to_string()));
                            }
                        }
                        Ok(())
                    }
                })),
            );
        }
        let first = f.add("createTask", 3).await;

        let report = f.processor.pass().await;
        assert_eq!(report.attempted, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.remaining, 1);
        assert!(report.needs_retry());
        let left = f.store.snapshot().await;
        assert_eq!(left.len(), 1);
        assert_ne!(left[0].id, first);
        assert_eq!(left[0].attempts, 0);

        let report = f.processor.pass().await;
        assert_eq!(report.attempted, 1);
        assert_eq!(report.delivered, 1);
        assert!(f.store.is_empty().await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stall_records_pruned_after_removal() {
        let f = fixture().await;
        let kept = f.add("uploadPhoto", 3).await;
        let dropped = f.add("uploadPhoto", 3).await;

        f.processor.pass().await;
        assert_eq!(f.processor.stalled_reported.lock().unwrap().len(), 2);

        assert!(f.store.remove(&dropped).await.unwrap());
        f.processor.pass().await;
        let reported = f.processor.stalled_reported.lock().unwrap().clone();
        assert_eq!(reported, HashSet::from([kept]));

        f.store.clear().await.unwrap();
        f.processor.pass().await;
        assert!(f.processor.stalled_reported.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn try_pass_is_dropped_while_draining() {
        let f = fixture().await;
        let _guard = f.processor.pass_lock.lock().await;
        assert!(f.processor.try_pass().await.is_none());
    }
}
