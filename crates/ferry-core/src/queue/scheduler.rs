use std::future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use super::processor::Processor;

/// Handle to the background task that decides when passes run.
///
/// Triggers:
/// - connectivity going from unreachable to reachable
/// - `wake` notifications (new work enqueued while reachable)
/// - the reschedule deadline after a pass that left deliverable work
///
/// A trigger that arrives while `OfflineQueue::force_process` is draining is
/// not lost: the task waits for that pass and then runs its own.
///
/// Dropping the handle or calling `request_shutdown` stops the task after
/// its current pass. An in-flight handler is not cancelled.
pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl Scheduler {
    /// Spawn the scheduler task on the current tokio runtime.
    pub fn spawn(
        processor: Arc<Processor>,
        wake: Arc<Notify>,
        reachability: watch::Receiver<bool>,
        reschedule_interval: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(scheduler_loop(
            processor,
            wake,
            reachability,
            shutdown_rx,
            reschedule_interval,
        ));
        Self { shutdown_tx, join }
    }

    /// Ask the task to stop without waiting for it.
    pub fn request_shutdown(&self) {
        // the loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shut down and wait for the loop to exit.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            warn!(error = %e, "scheduler task ended abnormally");
        }
    }
}

async fn scheduler_loop(
    processor: Arc<Processor>,
    wake: Arc<Notify>,
    mut reachability: watch::Receiver<bool>,
    mut shutdown_rx: watch::Receiver<bool>,
    interval: Duration,
) {
    let mut was_reachable = *reachability.borrow_and_update();
    let mut monitor_alive = true;
    // work restored from disk gets a pass right away
    let mut deadline = was_reachable.then(Instant::now);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let fire = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            changed = reachability.changed(), if monitor_alive => match changed {
                Ok(()) => {
                    let reachable = *reachability.borrow_and_update();
                    let came_online = reachable && !was_reachable;
                    if came_online {
                        info!("connectivity restored; draining queue");
                    } else if !reachable && was_reachable {
                        info!("connectivity lost; queue paused");
                    }
                    was_reachable = reachable;
                    came_online
                }
                Err(_) => {
                    warn!("connectivity monitor closed; relying on wake-ups and retries");
                    monitor_alive = false;
                    false
                }
            },
            _ = wake.notified() => true,
            _ = processor.rearm.notified() => {
                deadline = Some(Instant::now() + interval);
                false
            }
            _ = sleep_until_opt(deadline) => {
                deadline = None;
                true
            }
        };
        if !fire {
            continue;
        }

        let report = match processor.try_pass().await {
            Some(report) => report,
            None => {
                // A forced pass holds the lock and may have read reachability
                // before this trigger. Run again once it is done.
                debug!("pass in flight; queued behind it");
                processor.pass().await
            }
        };
        if report.needs_retry() {
            debug!(remaining = report.remaining, retry_in = ?interval, "retry scheduled");
            deadline = Some(Instant::now() + interval);
        } else {
            deadline = None;
        }
    }
    debug!("scheduler stopped");
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => future::pending().await,
    }
}
