//! Consistency repair between the change log and the entity tables.
//!
//! The log can drift from the tables it describes: rows removed behind the
//! engine's back leave stale records, rows imported without going through
//! the engine have none. The repairer fixes both in one transaction.

use crate::change_log::append_in;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use chrono::Utc;
use notesync_protocol::{ChangeRecord, EntityType, SourceId};
use notesync_store::{Store, Tables};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// What one repair pass changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RepairReport {
    /// Stale records deleted.
    pub removed: usize,
    /// Missing records created.
    pub created: usize,
}

impl RepairReport {
    /// Returns true if the pass changed nothing.
    pub fn is_clean(&self) -> bool {
        self.removed == 0 && self.created == 0
    }
}

/// Reconciles the change log with the entity tables.
#[derive(Debug, Clone)]
pub struct ConsistencyRepairer {
    store: Arc<Store>,
    config: SyncConfig,
}

impl ConsistencyRepairer {
    /// Creates a repairer for a store.
    pub fn new(store: Arc<Store>, config: SyncConfig) -> Self {
        Self { store, config }
    }

    /// Runs one repair pass.
    ///
    /// Deletes records whose entity no longer exists (or, for options, is no
    /// longer synced) and gives every entity without a record exactly one,
    /// tagged [`SourceId::REPAIR`]. A second pass right after is a no-op.
    pub fn run(&self) -> SyncResult<RepairReport> {
        let report = self.store.transaction(|txn| {
            let mut report = RepairReport::default();

            let stale: Vec<u64> = {
                let tables: &Tables = txn;
                tables
                    .sync
                    .values()
                    .filter(|record| !self.is_live(tables, record))
                    .map(|record| record.id)
                    .collect()
            };
            for id in stale {
                if let Some(record) = txn.sync.remove(&id) {
                    info!(
                        id,
                        entity_type = %record.entity_type,
                        entity_id = %record.entity_id,
                        "removing sync record for missing entity"
                    );
                    report.removed += 1;
                }
            }

            let covered: BTreeSet<(EntityType, String)> = txn
                .sync
                .values()
                .map(|record| (record.entity_type, record.entity_id.clone()))
                .collect();

            let repair = SourceId::repair();
            let now = Utc::now();
            for entity_type in EntityType::HASHED {
                for entity_id in txn.entity_ids(entity_type) {
                    if !self.is_synced(entity_type, &entity_id)
                        || covered.contains(&(entity_type, entity_id.clone()))
                    {
                        continue;
                    }
                    info!(
                        entity_type = %entity_type,
                        entity_id = %entity_id,
                        "creating missing sync record"
                    );
                    append_in(txn, entity_type, &entity_id, &repair, now);
                    report.created += 1;
                }
            }

            Ok::<_, SyncError>(report)
        })?;

        if !report.is_clean() {
            info!(removed = report.removed, created = report.created, "sync rows repaired");
        }
        Ok(report)
    }

    fn is_synced(&self, entity_type: EntityType, entity_id: &str) -> bool {
        entity_type != EntityType::Option || self.config.is_synced_option(entity_id)
    }

    fn is_live(&self, tables: &Tables, record: &ChangeRecord) -> bool {
        self.is_synced(record.entity_type, &record.entity_id)
            && tables.contains(record.entity_type, &record.entity_id)
    }
}
