//! Append-only change log.
//!
//! Every mutation of a synced entity produces one [`ChangeRecord`]. Record
//! ids form the logical clock of a replica: they are strictly increasing,
//! never reused and never decrease, even after the repairer deletes rows.

use crate::error::SyncResult;
use chrono::{DateTime, Utc};
use notesync_protocol::{ChangeRecord, EntityType, SourceId};
use notesync_store::{Store, Tables};
use std::sync::Arc;

/// Appends a change record inside an open transaction.
///
/// The entity write and its record commit together. Returns the assigned id.
pub fn append_in(
    tables: &mut Tables,
    entity_type: EntityType,
    entity_id: &str,
    source_id: &SourceId,
    now: DateTime<Utc>,
) -> u64 {
    // Never hand out an id at or below a surviving row, whatever the counter says.
    let floor = tables.sync.keys().next_back().map_or(0, |max| max + 1);
    let id = tables.next_sync_id.max(floor).max(1);
    tables.next_sync_id = id + 1;

    tables.sync.insert(
        id,
        ChangeRecord {
            id,
            entity_type,
            entity_id: entity_id.to_string(),
            source_id: source_id.clone(),
            sync_date: now,
        },
    );
    id
}

/// Highest change id present in the log (0 when empty).
pub fn max_id_in(tables: &Tables) -> u64 {
    tables.sync.keys().next_back().copied().unwrap_or(0)
}

/// The change log table of one replica.
#[derive(Debug, Clone)]
pub struct ChangeLog {
    store: Arc<Store>,
}

impl ChangeLog {
    /// Creates a change log over a store.
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Appends one record in its own transaction and returns its id.
    ///
    /// Concurrent appends are serialized by the store's write lock.
    pub fn append(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        source_id: &SourceId,
    ) -> SyncResult<u64> {
        self.store.transaction(|txn| {
            Ok(append_in(txn, entity_type, entity_id, source_id, Utc::now()))
        })
    }

    /// Every record with `id > after_id`, ascending by id.
    pub fn query(&self, after_id: u64) -> Vec<ChangeRecord> {
        self.store.read(|tables| {
            tables
                .sync
                .range(after_id.saturating_add(1)..)
                .map(|(_, record)| record.clone())
                .collect()
        })
    }

    /// Highest id in the log, or 0 when empty.
    pub fn max_id(&self) -> u64 {
        self.store.read(max_id_in)
    }

    /// All records referring to one entity, ascending by id.
    pub fn records_for(&self, entity_type: EntityType, entity_id: &str) -> Vec<ChangeRecord> {
        self.store.read(|tables| {
            tables
                .sync
                .values()
                .filter(|record| record.refers_to(entity_type, entity_id))
                .cloned()
                .collect()
        })
    }

    /// Number of records in the log.
    pub fn len(&self) -> usize {
        self.store.read(|tables| tables.sync.len())
    }

    /// Returns true if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    fn log() -> ChangeLog {
        ChangeLog::new(Arc::new(Store::open_in_memory()))
    }

    #[test]
    fn empty_log() {
        let log = log();
        assert_eq!(log.max_id(), 0);
        assert!(log.query(0).is_empty());
        assert!(log.is_empty());
    }

    #[test]
    fn append_and_query() {
        let log = log();
        let source = SourceId::new("a");
        let first = log.append(EntityType::Note, "n1", &source).unwrap();
        let second = log.append(EntityType::NoteTree, "t1", &source).unwrap();
        let third = log.append(EntityType::Note, "n1", &source).unwrap();

        assert!(first < second && second < third);
        assert_eq!(log.max_id(), third);

        let after_first: Vec<u64> = log.query(first).iter().map(|r| r.id).collect();
        assert_eq!(after_first, vec![second, third]);
        assert_eq!(log.records_for(EntityType::Note, "n1").len(), 2);
    }

    #[test]
    fn ids_not_reused_after_delete() {
        let store = Arc::new(Store::open_in_memory());
        let log = ChangeLog::new(store.clone());
        let source = SourceId::new("a");
        let first = log.append(EntityType::Note, "n1", &source).unwrap();

        store
            .transaction(|txn| {
                txn.sync.clear();
                Ok::<_, crate::SyncError>(())
            })
            .unwrap();

        let second = log.append(EntityType::Note, "n2", &source).unwrap();
        assert!(second > first);
    }

    #[test]
    fn concurrent_appends_are_unique_and_ordered() {
        let log = log();
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let log = log.clone();
                thread::spawn(move || {
                    let source = SourceId::new(format!("w{worker}"));
                    (0..25)
                        .map(|i| {
                            log.append(EntityType::Note, &format!("{worker}-{i}"), &source)
                                .unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            let ids = handle.join().unwrap();
            // Each writer observes its own ids increasing.
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            all.extend(ids);
        }

        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 200);
        assert_eq!(log.max_id(), *all.last().unwrap());
    }

    proptest! {
        #[test]
        fn query_never_returns_at_or_below_watermark(
            appends in 1usize..40,
            after in 0u64..50,
        ) {
            let log = log();
            let source = SourceId::new("p");
            for i in 0..appends {
                log.append(EntityType::RecentNote, &i.to_string(), &source).unwrap();
            }

            let records = log.query(after);
            prop_assert!(records.iter().all(|r| r.id > after));
            prop_assert!(records.windows(2).all(|w| w[0].id < w[1].id));
            let expected = (appends as u64).saturating_sub(after) as usize;
            prop_assert_eq!(records.len(), expected);
        }
    }
}
