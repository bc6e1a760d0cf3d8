//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use notesync_protocol::{ApplyOutcome, ChangeRecord, CheckResponse, Entity, EntityType, SourceId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The request/response channel to one remote peer.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process loopback, mock for testing).
/// All calls are blocking.
pub trait PeerTransport: Send + Sync {
    /// Fetches the peer's content hashes, max change id and identity.
    fn check(&self) -> SyncResult<CheckResponse>;

    /// Fetches the peer's change records with `id > last_sync_id`.
    fn changed(&self, last_sync_id: u64) -> SyncResult<Vec<ChangeRecord>>;

    /// Fetches one entity snapshot; `None` if the peer no longer has it.
    fn fetch_entity(&self, entity_type: EntityType, entity_id: &str)
        -> SyncResult<Option<Entity>>;

    /// Sends one snapshot, tagged with the replica that produced the change.
    fn push_entity(&self, entity: &Entity, source_id: &SourceId) -> SyncResult<ApplyOutcome>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport connection.
    fn close(&self) -> SyncResult<()>;
}

impl<T: PeerTransport + ?Sized> PeerTransport for Arc<T> {
    fn check(&self) -> SyncResult<CheckResponse> {
        (**self).check()
    }

    fn changed(&self, last_sync_id: u64) -> SyncResult<Vec<ChangeRecord>> {
        (**self).changed(last_sync_id)
    }

    fn fetch_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> SyncResult<Option<Entity>> {
        (**self).fetch_entity(entity_type, entity_id)
    }

    fn push_entity(&self, entity: &Entity, source_id: &SourceId) -> SyncResult<ApplyOutcome> {
        (**self).push_entity(entity, source_id)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn close(&self) -> SyncResult<()> {
        (**self).close()
    }
}

#[derive(Debug, Default)]
struct MockPeer {
    check: Option<CheckResponse>,
    records: Vec<ChangeRecord>,
    entities: BTreeMap<(EntityType, String), Entity>,
    failing_fetches: BTreeSet<(EntityType, String)>,
    rejected_pushes: BTreeSet<(EntityType, String)>,
    failing_pushes: BTreeSet<(EntityType, String)>,
    pushed: Vec<(Entity, SourceId)>,
    check_calls: usize,
}

type FetchHook = Arc<dyn Fn(EntityType, &str) + Send + Sync>;

/// A scripted peer for testing.
///
/// Serves whatever check response, change records and entities the test
/// put in, records every push, and can be told to fail specific requests.
pub struct MockTransport {
    connected: AtomicBool,
    peer: Mutex<MockPeer>,
    fetch_hook: Mutex<Option<FetchHook>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            peer: Mutex::new(MockPeer::default()),
            fetch_hook: Mutex::new(None),
        }
    }

    /// Runs `hook` at the start of every entity fetch.
    pub fn on_fetch(&self, hook: impl Fn(EntityType, &str) + Send + Sync + 'static) {
        *self.fetch_hook.lock() = Some(Arc::new(hook));
    }

    /// Sets the check response.
    pub fn set_check_response(&self, response: CheckResponse) {
        self.peer.lock().check = Some(response);
    }

    /// Adds a change record to the peer's log.
    pub fn add_record(&self, record: ChangeRecord) {
        self.peer.lock().records.push(record);
    }

    /// Stores an entity the peer will serve.
    pub fn put_entity(&self, entity: Entity) {
        let key = (entity.entity_type(), entity.entity_id().to_string());
        self.peer.lock().entities.insert(key, entity);
    }

    /// Makes fetches of one entity fail with a retryable transport error.
    pub fn fail_fetch(&self, entity_type: EntityType, entity_id: &str) {
        self.peer
            .lock()
            .failing_fetches
            .insert((entity_type, entity_id.to_string()));
    }

    /// Makes pushes of one entity fail with a retryable transport error.
    pub fn fail_push(&self, entity_type: EntityType, entity_id: &str) {
        self.peer
            .lock()
            .failing_pushes
            .insert((entity_type, entity_id.to_string()));
    }

    /// Makes the peer reject pushes of one entity.
    pub fn reject_push(&self, entity_type: EntityType, entity_id: &str) {
        self.peer
            .lock()
            .rejected_pushes
            .insert((entity_type, entity_id.to_string()));
    }

    /// Clears every scripted failure.
    pub fn heal(&self) {
        let mut peer = self.peer.lock();
        peer.failing_fetches.clear();
        peer.failing_pushes.clear();
    }

    /// Every push received so far, in order.
    pub fn pushed(&self) -> Vec<(Entity, SourceId)> {
        self.peer.lock().pushed.clone()
    }

    /// Number of check requests served.
    pub fn check_calls(&self) -> usize {
        self.peer.lock().check_calls
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn ensure_connected(&self) -> SyncResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SyncError::NotConnected)
        }
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("connected", &self.connected)
            .field("peer", &*self.peer.lock())
            .finish_non_exhaustive()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerTransport for MockTransport {
    fn check(&self) -> SyncResult<CheckResponse> {
        self.ensure_connected()?;
        let mut peer = self.peer.lock();
        peer.check_calls += 1;
        peer.check
            .clone()
            .ok_or_else(|| SyncError::transport_fatal("no mock check response set"))
    }

    fn changed(&self, last_sync_id: u64) -> SyncResult<Vec<ChangeRecord>> {
        self.ensure_connected()?;
        let mut records: Vec<ChangeRecord> = self
            .peer
            .lock()
            .records
            .iter()
            .filter(|record| record.id > last_sync_id)
            .cloned()
            .collect();
        records.sort_by_key(|record| record.id);
        Ok(records)
    }

    fn fetch_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> SyncResult<Option<Entity>> {
        self.ensure_connected()?;
        let hook = self.fetch_hook.lock().clone();
        if let Some(hook) = hook {
            hook(entity_type, entity_id);
        }
        let peer = self.peer.lock();
        let key = (entity_type, entity_id.to_string());
        if peer.failing_fetches.contains(&key) {
            return Err(SyncError::transport_retryable(format!(
                "connection reset fetching {entity_type}/{entity_id}"
            )));
        }
        Ok(peer.entities.get(&key).cloned())
    }

    fn push_entity(&self, entity: &Entity, source_id: &SourceId) -> SyncResult<ApplyOutcome> {
        self.ensure_connected()?;
        let mut peer = self.peer.lock();
        let key = (entity.entity_type(), entity.entity_id().to_string());
        if peer.failing_pushes.contains(&key) {
            return Err(SyncError::transport_retryable("connection reset during push"));
        }
        if peer.rejected_pushes.contains(&key) {
            return Err(SyncError::Rejected("rejected by mock peer".into()));
        }

        peer.pushed.push((entity.clone(), source_id.clone()));
        if peer.entities.get(&key) == Some(entity) {
            return Ok(ApplyOutcome::Skipped);
        }
        peer.entities.insert(key, entity.clone());
        Ok(ApplyOutcome::Applied)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
