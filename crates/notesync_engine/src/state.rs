//! Sync engine state machine.
//!
//! One cycle runs `HashCheck → PullChanges → PushChanges` against a single
//! peer. At most one cycle runs per engine; a caller arriving while a cycle
//! is in flight waits for it and receives its result instead of starting a
//! second one.

use crate::error::{SyncError, SyncResult};
use crate::replica::Replica;
use crate::transport::PeerTransport;
use crate::watermark::SyncWatermark;
use notesync_protocol::{ApplyOutcome, ChangeRecord, SourceId};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Engine is idle, not syncing.
    Idle,
    /// Engine is comparing content hashes with the peer.
    HashCheck,
    /// Engine is pulling changes from the peer.
    PullChanges,
    /// Engine is pushing changes to the peer.
    PushChanges,
    /// The last cycle failed.
    Failed,
    /// Engine is waiting before retrying.
    RetryWait,
}

impl SyncState {
    /// Returns true if a cycle is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::HashCheck | SyncState::PullChanges | SyncState::PushChanges
        )
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Hashes matched and the peer had nothing new; nothing was exchanged.
    AlreadyInSync,
    /// Both phases ran to completion.
    Synced,
}

/// Result of a sync cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCycleResult {
    /// How the cycle ended.
    pub outcome: SyncOutcome,
    /// Pulled records that changed local state.
    pub pulled: u64,
    /// Pushed records the peer applied.
    pub pushed: u64,
    /// Records that needed no change or referred to a missing entity.
    pub skipped: u64,
    /// Records that failed validation on either side.
    pub rejected: u64,
    /// Watermark after the cycle.
    #[serde(skip)]
    pub watermark: SyncWatermark,
    /// Duration of the sync cycle.
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl SyncCycleResult {
    fn new(outcome: SyncOutcome, watermark: SyncWatermark) -> Self {
        Self {
            outcome,
            pulled: 0,
            pushed: 0,
            skipped: 0,
            rejected: 0,
            watermark,
            duration: Duration::ZERO,
        }
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        duration: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Total number of cycles that failed.
    pub cycles_failed: u64,
    /// Total number of records pulled and applied.
    pub records_pulled: u64,
    /// Total number of records pushed and applied by the peer.
    pub records_pushed: u64,
    /// Total number of rejected records.
    pub records_rejected: u64,
    /// Total number of retries.
    pub retries: u64,
    /// Last sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Something that can run sync cycles on demand.
///
/// Object-safe so the scheduler and the server can hold an engine without
/// knowing its transport.
pub trait SyncRunner: Send + Sync {
    /// Runs one cycle (or joins the one in flight) and returns its result.
    fn run_cycle(&self) -> SyncResult<SyncCycleResult>;

    /// Resets both watermarks and runs a cycle that exchanges the full
    /// logs. The reset happens under the cycle guard, so it never splits a
    /// cycle in flight.
    fn run_full_cycle(&self) -> SyncResult<SyncCycleResult>;
}

type SharedOutcome = Result<SyncCycleResult, String>;

/// The sync engine drives cycles between a local replica and one peer.
pub struct SyncEngine<T: PeerTransport> {
    replica: Arc<Replica>,
    transport: T,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    cancelled: AtomicBool,
    cycle: Mutex<()>,
    in_cycle: AtomicBool,
    started: AtomicU64,
    last: Mutex<Option<(u64, SharedOutcome)>>,
}

impl<T: PeerTransport> SyncEngine<T> {
    /// Creates a new sync engine.
    pub fn new(replica: Arc<Replica>, transport: T) -> Self {
        Self {
            replica,
            transport,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancelled: AtomicBool::new(false),
            cycle: Mutex::new(()),
            in_cycle: AtomicBool::new(false),
            started: AtomicU64::new(0),
            last: Mutex::new(None),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// The local replica.
    pub fn replica(&self) -> &Arc<Replica> {
        &self.replica
    }

    /// The peer transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Cancels the running cycle at the next record boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Checks if sync was cancelled.
    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sets the state.
    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Runs one sync cycle, or joins the one already in flight.
    pub fn sync(&self) -> SyncResult<SyncCycleResult> {
        if let Some(_guard) = self.cycle.try_lock() {
            return self.run_exclusive();
        }

        // The guard is also held by watermark resets; only a running cycle
        // is joined.
        let joined = self
            .in_cycle
            .load(Ordering::SeqCst)
            .then(|| self.started.load(Ordering::SeqCst));
        let _guard = self.cycle.lock();
        if let Some(joined) = joined {
            if let Some((finished, outcome)) = &*self.last.lock() {
                if *finished >= joined {
                    debug!(cycle = joined, "joined sync cycle in flight");
                    return outcome.clone().map_err(SyncError::CycleFailed);
                }
            }
        }
        self.run_exclusive()
    }

    /// Resets both watermarks, then runs a cycle that exchanges the full
    /// logs. Waits for a cycle in flight instead of joining it.
    pub fn sync_full(&self) -> SyncResult<SyncCycleResult> {
        let _guard = self.cycle.lock();
        self.replica.reset_watermark()?;
        info!("sync watermarks reset, running full cycle");
        self.run_exclusive()
    }

    /// Runs a cycle; the caller holds the cycle lock.
    fn run_exclusive(&self) -> SyncResult<SyncCycleResult> {
        let number = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        self.in_cycle.store(true, Ordering::SeqCst);
        self.cancelled.store(false, Ordering::SeqCst);
        let start = Instant::now();
        info!(cycle = number, source_id = %self.replica.source_id(), "sync cycle started");

        let mut result = self.run_phases().map(|mut result| {
            result.duration = start.elapsed();
            result
        });

        // Stores that defer writes are persisted once per cycle.
        if let Err(err) = self.replica.store().flush_pending() {
            if result.is_ok() {
                result = Err(err.into());
            } else {
                warn!(error = %err, "could not persist store after failed cycle");
            }
        }

        match &result {
            Ok(done) => {
                self.set_state(SyncState::Idle);
                let mut stats = self.stats.write();
                stats.cycles_completed += 1;
                stats.records_pulled += done.pulled;
                stats.records_pushed += done.pushed;
                stats.records_rejected += done.rejected;
                stats.last_sync_time = Some(Instant::now());
                stats.last_error = None;
                info!(
                    cycle = number,
                    outcome = ?done.outcome,
                    pulled = done.pulled,
                    pushed = done.pushed,
                    skipped = done.skipped,
                    rejected = done.rejected,
                    duration_ms = done.duration.as_millis() as u64,
                    "sync cycle finished"
                );
            }
            Err(err) => {
                self.set_state(SyncState::Failed);
                let mut stats = self.stats.write();
                stats.cycles_failed += 1;
                stats.last_error = Some(err.to_string());
                warn!(cycle = number, error = %err, "sync cycle failed");
            }
        }

        let shared = match &result {
            Ok(done) => Ok(done.clone()),
            Err(err) => Err(err.to_string()),
        };
        *self.last.lock() = Some((number, shared));
        self.in_cycle.store(false, Ordering::SeqCst);
        result
    }

    fn run_phases(&self) -> SyncResult<SyncCycleResult> {
        let mut watermark = self.replica.watermark();

        self.set_state(SyncState::HashCheck);
        let remote = self.transport.check()?;
        if remote.source_id == *self.replica.source_id() {
            return Err(SyncError::transport_fatal("peer has the same replica id"));
        }
        let local_hashes = self.replica.hashes()?;
        if remote.max_sync_id <= watermark.last_synced_pull && remote.hashes == local_hashes {
            debug!(max_sync_id = remote.max_sync_id, "content hashes match, nothing to do");
            return Ok(SyncCycleResult::new(SyncOutcome::AlreadyInSync, watermark));
        }

        let mut result = SyncCycleResult::new(SyncOutcome::Synced, watermark);

        self.check_cancelled()?;
        self.set_state(SyncState::PullChanges);
        self.pull_changes(&mut watermark, &mut result)?;

        self.check_cancelled()?;
        self.set_state(SyncState::PushChanges);
        self.push_changes(&mut watermark, &remote.source_id, &mut result)?;

        result.watermark = watermark;
        Ok(result)
    }

    /// Pulls and applies every peer record above the pull watermark.
    fn pull_changes(
        &self,
        watermark: &mut SyncWatermark,
        result: &mut SyncCycleResult,
    ) -> SyncResult<()> {
        let records = self.transport.changed(watermark.last_synced_pull)?;
        debug!(count = records.len(), after = watermark.last_synced_pull, "pulling changes");

        let mut processed = watermark.last_synced_pull;
        for record in records {
            if record.id <= processed {
                continue;
            }
            if let Err(err) = self
                .check_cancelled()
                .and_then(|()| self.pull_record(&record, result))
            {
                return self.stop_pull(watermark, processed, err);
            }
            processed = record.id;
        }

        if processed > watermark.last_synced_pull {
            watermark.last_synced_pull = processed;
            watermark.save(self.replica.store())?;
        }
        Ok(())
    }

    fn pull_record(&self, record: &ChangeRecord, result: &mut SyncCycleResult) -> SyncResult<()> {
        if record.source_id == *self.replica.source_id() {
            debug!(id = record.id, "skipping our own change");
            return Ok(());
        }

        let entity = match self
            .transport
            .fetch_entity(record.entity_type, &record.entity_id)
        {
            Ok(Some(entity)) => entity,
            Ok(None) => {
                debug!(
                    id = record.id,
                    entity_type = %record.entity_type,
                    entity_id = %record.entity_id,
                    "entity no longer exists on peer"
                );
                result.skipped += 1;
                return Ok(());
            }
            Err(err) if err.is_validation_failure() => {
                warn!(id = record.id, error = %err, "peer refused entity");
                result.rejected += 1;
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        match self.replica.apply(entity, &record.source_id)? {
            ApplyOutcome::Applied => result.pulled += 1,
            ApplyOutcome::Skipped => result.skipped += 1,
            ApplyOutcome::Rejected { reason } => {
                warn!(
                    id = record.id,
                    entity_type = %record.entity_type,
                    entity_id = %record.entity_id,
                    %reason,
                    "rejected pulled entity"
                );
                result.rejected += 1;
            }
        }
        Ok(())
    }

    /// Saves the processed prefix (unless storage itself failed) and fails.
    fn stop_pull(
        &self,
        watermark: &mut SyncWatermark,
        processed: u64,
        err: SyncError,
    ) -> SyncResult<()> {
        if !matches!(err, SyncError::Store(_)) && processed > watermark.last_synced_pull {
            watermark.last_synced_pull = processed;
            watermark.save(self.replica.store())?;
            debug!(last_synced_pull = processed, "saved pull progress before failing");
        }
        Err(err)
    }

    /// Sends every local record above the push watermark that did not come
    /// from the peer.
    fn push_changes(
        &self,
        watermark: &mut SyncWatermark,
        peer: &SourceId,
        result: &mut SyncCycleResult,
    ) -> SyncResult<()> {
        let records = self.replica.changed(watermark.last_synced_push);
        debug!(count = records.len(), after = watermark.last_synced_push, "pushing changes");

        let mut processed = watermark.last_synced_push;
        for record in records {
            if let Err(err) = self
                .check_cancelled()
                .and_then(|()| self.push_record(&record, peer, result))
            {
                if !matches!(err, SyncError::Store(_)) && processed > watermark.last_synced_push {
                    watermark.last_synced_push = processed;
                    watermark.save(self.replica.store())?;
                }
                return Err(err);
            }
            processed = record.id;
        }

        if processed > watermark.last_synced_push {
            watermark.last_synced_push = processed;
            watermark.save(self.replica.store())?;
        }
        Ok(())
    }

    fn push_record(
        &self,
        record: &ChangeRecord,
        peer: &SourceId,
        result: &mut SyncCycleResult,
    ) -> SyncResult<()> {
        if record.source_id == *peer {
            debug!(id = record.id, "not echoing change back to its origin");
            return Ok(());
        }

        let Some(entity) = self.replica.entity(record.entity_type, &record.entity_id) else {
            debug!(
                id = record.id,
                entity_type = %record.entity_type,
                entity_id = %record.entity_id,
                "entity no longer exists locally"
            );
            result.skipped += 1;
            return Ok(());
        };

        match self.transport.push_entity(&entity, &record.source_id) {
            Ok(ApplyOutcome::Applied) => result.pushed += 1,
            Ok(ApplyOutcome::Skipped) => result.skipped += 1,
            Ok(ApplyOutcome::Rejected { reason }) => {
                warn!(id = record.id, %reason, "peer rejected pushed entity");
                result.rejected += 1;
            }
            Err(err) if err.is_validation_failure() => {
                warn!(id = record.id, error = %err, "peer rejected pushed entity");
                result.rejected += 1;
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// Performs a sync with retry on transient errors.
    pub fn sync_with_retry(&self) -> SyncResult<SyncCycleResult> {
        let retry_config = self.replica.config().retry.clone();
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                self.set_state(SyncState::RetryWait);
                std::thread::sleep(retry_config.delay_for_attempt(attempt));
                self.stats.write().retries += 1;
            }

            match self.sync() {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt + 1 < retry_config.max_attempts => {
                    debug!(attempt, error = %e, "retrying sync cycle");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl<T: PeerTransport> SyncRunner for SyncEngine<T> {
    fn run_cycle(&self) -> SyncResult<SyncCycleResult> {
        self.sync()
    }

    fn run_full_cycle(&self) -> SyncResult<SyncCycleResult> {
        self.sync_full()
    }
}
