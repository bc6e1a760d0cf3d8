//! Background sync scheduling and full resync.
//!
//! The scheduler is a tokio task fed by a one-slot trigger channel. Each
//! trigger runs one cycle on the blocking pool through the engine's cycle
//! guard. Triggers that arrive while one is already queued are folded into
//! it, so a burst of triggers costs at most one extra cycle.
//!
//! A full resync is a flag read by the task when it picks up its next
//! trigger. The watermark reset happens there, under the cycle guard, so
//! the caller never waits for a cycle in flight.

use crate::error::{SyncError, SyncResult};
use crate::state::SyncRunner;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Handle to the background sync task.
pub struct SyncScheduler {
    full_pending: Arc<AtomicBool>,
    tx: mpsc::Sender<()>,
    cycles: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

impl SyncScheduler {
    /// Spawns the scheduler task on `handle`.
    pub fn spawn(runner: Arc<dyn SyncRunner>, handle: &Handle) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let (cycles_tx, cycles) = watch::channel(0);
        let full_pending = Arc::new(AtomicBool::new(false));
        let task = handle.spawn(run(runner, full_pending.clone(), rx, cycles_tx));

        Self {
            full_pending,
            tx,
            cycles,
            task,
        }
    }

    /// Requests a cycle without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SchedulerStopped`] if the task is gone.
    pub fn trigger(&self) -> SyncResult<()> {
        match self.tx.try_send(()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!("sync already queued, coalescing trigger");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(())) => Err(SyncError::SchedulerStopped),
        }
    }

    /// Requests a cycle that first resets both watermarks. Returns at once;
    /// the reset and the cycle both run on the scheduler task.
    pub fn force_full_sync(&self) -> SyncResult<()> {
        self.full_pending.store(true, Ordering::SeqCst);
        info!("full sync requested");
        self.trigger()
    }

    /// Counter of finished cycles (successful or not).
    pub fn cycles(&self) -> watch::Receiver<u64> {
        self.cycles.clone()
    }

    /// Stops accepting triggers and waits for the task to drain.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(err) = self.task.await {
            error!(error = %err, "sync scheduler task panicked");
        }
    }
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("cycles", &*self.cycles.borrow())
            .finish_non_exhaustive()
    }
}

async fn run(
    runner: Arc<dyn SyncRunner>,
    full_pending: Arc<AtomicBool>,
    mut rx: mpsc::Receiver<()>,
    cycles: watch::Sender<u64>,
) {
    while rx.recv().await.is_some() {
        let full = full_pending.swap(false, Ordering::SeqCst);
        let cycle_runner = runner.clone();
        let cycle = tokio::task::spawn_blocking(move || {
            if full {
                cycle_runner.run_full_cycle()
            } else {
                cycle_runner.run_cycle()
            }
        });
        match cycle.await {
            Ok(Ok(result)) => debug!(
                full,
                outcome = ?result.outcome,
                pulled = result.pulled,
                pushed = result.pushed,
                "scheduled sync finished"
            ),
            Ok(Err(err)) => warn!(error = %err, "scheduled sync failed"),
            Err(err) => error!(error = %err, "scheduled sync panicked"),
        }
        cycles.send_modify(|count| *count += 1);
    }
    debug!("sync scheduler stopped");
}
