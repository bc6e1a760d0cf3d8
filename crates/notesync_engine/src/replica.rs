//! The local side of replication.
//!
//! A [`Replica`] bundles a store with its identity, change log, update
//! handlers and repairer. The orchestrator drives it as the local end of a
//! cycle; the server crate exposes it to remote peers.

use crate::change_log::{append_in, max_id_in, ChangeLog};
use crate::config::SyncConfig;
use crate::content_hash::current_hashes;
use crate::error::{SyncError, SyncResult};
use crate::repair::{ConsistencyRepairer, RepairReport};
use crate::updates::{UpdateHandlers, OPTION_NOT_SYNCED};
use crate::watermark::SyncWatermark;
use chrono::Utc;
use notesync_protocol::{ApplyOutcome, ChangeRecord, CheckResponse, Entity, EntityType, SourceId};
use notesync_store::Store;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Local option holding this replica's identity.
pub const SOURCE_ID_OPTION: &str = "source_id";

/// One replica of the note store.
#[derive(Debug, Clone)]
pub struct Replica {
    store: Arc<Store>,
    config: SyncConfig,
    log: ChangeLog,
    handlers: UpdateHandlers,
}

impl Replica {
    /// Opens a replica with the default configuration and the identity
    /// persisted in the store (generated on first open).
    pub fn open(store: Arc<Store>) -> SyncResult<Self> {
        let source_id = Self::load_identity(&store)?;
        Ok(Self::with_config(store, SyncConfig::new(source_id)))
    }

    /// Creates a replica with an explicit configuration.
    pub fn with_config(store: Arc<Store>, config: SyncConfig) -> Self {
        Self {
            log: ChangeLog::new(store.clone()),
            handlers: UpdateHandlers::new(store.clone(), config.clone()),
            store,
            config,
        }
    }

    /// Reads the persisted identity, generating and storing one if absent.
    pub fn load_identity(store: &Store) -> SyncResult<SourceId> {
        let existing = store.read(|t| t.option_value(SOURCE_ID_OPTION).map(SourceId::from));
        if let Some(existing) = existing {
            return Ok(existing);
        }

        store.transaction(|txn| {
            // Another opener may have raced us to it.
            if let Some(existing) = txn.option_value(SOURCE_ID_OPTION) {
                return Ok(SourceId::from(existing));
            }
            let generated = SourceId::generate();
            txn.set_option(SOURCE_ID_OPTION, generated.as_str(), Utc::now());
            info!(source_id = %generated, "generated replica identity");
            Ok::<_, SyncError>(generated)
        })
    }

    /// This replica's identity.
    pub fn source_id(&self) -> &SourceId {
        &self.config.source_id
    }

    /// The replica configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The change log.
    pub fn change_log(&self) -> &ChangeLog {
        &self.log
    }

    /// Content hashes of the synced collections.
    pub fn hashes(&self) -> SyncResult<BTreeMap<EntityType, String>> {
        self.store
            .read(|tables| current_hashes(tables, &self.config.synced_options))
    }

    /// Answers a peer's consistency check.
    ///
    /// Hashes and max id are read from the same committed snapshot.
    pub fn check(&self) -> SyncResult<CheckResponse> {
        self.store.read(|tables| {
            Ok::<_, SyncError>(CheckResponse {
                hashes: current_hashes(tables, &self.config.synced_options)?,
                max_sync_id: max_id_in(tables),
                source_id: self.config.source_id.clone(),
            })
        })
    }

    /// Change records with `id > after`.
    pub fn changed(&self, after: u64) -> Vec<ChangeRecord> {
        self.log.query(after)
    }

    /// One entity snapshot, if it exists.
    ///
    /// Options outside the allow-list read as absent; use [`Replica::option`]
    /// to distinguish them.
    pub fn entity(&self, entity_type: EntityType, entity_id: &str) -> Option<Entity> {
        if entity_type == EntityType::Option && !self.config.is_synced_option(entity_id) {
            return None;
        }
        self.store.read(|tables| tables.entity(entity_type, entity_id))
    }

    /// A synced option.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Rejected`] if the option is not allow-listed.
    pub fn option(&self, name: &str) -> SyncResult<Option<Entity>> {
        if !self.config.is_synced_option(name) {
            return Err(SyncError::Rejected(OPTION_NOT_SYNCED.to_string()));
        }
        Ok(self.store.read(|tables| tables.entity(EntityType::Option, name)))
    }

    /// Applies a snapshot received from a peer.
    pub fn apply(&self, entity: Entity, source_id: &SourceId) -> SyncResult<ApplyOutcome> {
        self.handlers.apply(entity, source_id)
    }

    /// Writes a local edit and records it with this replica's identity.
    ///
    /// Returns the change id, or `None` for a local-only option, which is
    /// written without a change record.
    pub fn save_local(&self, entity: impl Into<Entity>) -> SyncResult<Option<u64>> {
        let entity = entity.into();
        let entity_type = entity.entity_type();
        let entity_id = entity.entity_id().to_string();
        let recorded =
            entity_type != EntityType::Option || self.config.is_synced_option(&entity_id);

        self.store.transaction(|txn| {
            txn.upsert(entity);
            let id = if recorded {
                Some(append_in(txn, entity_type, &entity_id, self.source_id(), Utc::now()))
            } else {
                None
            };
            Ok::<_, SyncError>(id)
        })
    }

    /// Records that the children of `parent_note_id` were reordered locally.
    pub fn record_reordering(&self, parent_note_id: &str) -> SyncResult<u64> {
        self.log
            .append(EntityType::NoteReordering, parent_note_id, self.source_id())
    }

    /// The committed watermark.
    pub fn watermark(&self) -> SyncWatermark {
        SyncWatermark::load(&self.store)
    }

    /// Resets both watermarks to 0.
    pub fn reset_watermark(&self) -> SyncResult<()> {
        SyncWatermark::reset(&self.store)
    }

    /// Reconciles the change log with the entity tables.
    pub fn repair(&self) -> SyncResult<RepairReport> {
        ConsistencyRepairer::new(self.store.clone(), self.config.clone()).run()
    }
}
