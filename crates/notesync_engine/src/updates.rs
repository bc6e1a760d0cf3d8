//! Entity update handlers.
//!
//! Applying a snapshot is idempotent: a snapshot equal to the stored row is
//! skipped without a change record, which is what stops two replicas from
//! echoing the same change back and forth.

use crate::change_log::append_in;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use notesync_protocol::{
    ApplyOutcome, Entity, EntityType, NoteHistory, NoteReordering, NoteTree, SourceId,
};
use notesync_store::{Store, Tables};
use std::sync::Arc;
use tracing::{debug, warn};

/// Message used when a peer sends an option outside the allow-list.
pub const OPTION_NOT_SYNCED: &str = "This option can't be synced.";

/// Applies incoming snapshots to the local tables.
#[derive(Debug, Clone)]
pub struct UpdateHandlers {
    store: Arc<Store>,
    config: SyncConfig,
}

impl UpdateHandlers {
    /// Creates the handlers for a store.
    pub fn new(store: Arc<Store>, config: SyncConfig) -> Self {
        Self { store, config }
    }

    /// Applies one snapshot produced by `source_id`.
    ///
    /// Runs in a single store transaction. On `Applied` exactly one change
    /// record tagged with `source_id` is appended for the entity itself (plus
    /// locally tagged records for any sibling moved by tree repair).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Store`] if the transaction cannot be committed.
    /// Validation failures are reported as [`ApplyOutcome::Rejected`].
    pub fn apply(&self, entity: Entity, source_id: &SourceId) -> SyncResult<ApplyOutcome> {
        if let Entity::Option(option) = &entity {
            if !self.config.is_synced_option(&option.opt_name) {
                warn!(option = %option.opt_name, source = %source_id, "rejecting unsynced option");
                return Ok(ApplyOutcome::rejected(OPTION_NOT_SYNCED));
            }
        }

        let entity_type = entity.entity_type();
        let entity_id = entity.entity_id().to_string();
        let local = &self.config.source_id;

        let outcome = self.store.transaction(|txn| {
            let now = Utc::now();
            let outcome = match entity {
                Entity::Note(_) | Entity::RecentNote(_) | Entity::Option(_) => {
                    upsert(txn, entity, source_id, now)
                }
                Entity::NoteHistory(revision) => apply_history(txn, revision, source_id, now),
                Entity::NoteTree(row) => apply_tree(txn, row, source_id, local, now),
                Entity::NoteReordering(reordering) => {
                    apply_reordering(txn, reordering, source_id, now)
                }
            };
            Ok::<_, SyncError>(outcome)
        })?;

        debug!(
            entity_type = %entity_type,
            entity_id = %entity_id,
            source = %source_id,
            ?outcome,
            "applied update"
        );
        Ok(outcome)
    }
}

/// Last writer wins: insert when absent, overwrite when different.
fn upsert(
    tables: &mut Tables,
    entity: Entity,
    source_id: &SourceId,
    now: DateTime<Utc>,
) -> ApplyOutcome {
    let entity_type = entity.entity_type();
    let entity_id = entity.entity_id().to_string();

    if tables.entity(entity_type, &entity_id).as_ref() == Some(&entity) {
        return ApplyOutcome::Skipped;
    }

    tables.upsert(entity);
    append_in(tables, entity_type, &entity_id, source_id, now);
    ApplyOutcome::Applied
}

/// Revisions are immutable once written.
fn apply_history(
    tables: &mut Tables,
    revision: NoteHistory,
    source_id: &SourceId,
    now: DateTime<Utc>,
) -> ApplyOutcome {
    if let Some(existing) = tables.notes_history.get(&revision.note_history_id) {
        if *existing != revision {
            warn!(
                note_history_id = %revision.note_history_id,
                "ignoring change to existing note revision"
            );
        }
        return ApplyOutcome::Skipped;
    }

    upsert(tables, Entity::NoteHistory(revision), source_id, now)
}

/// Upserts a tree row, then moves any live sibling sharing its position to
/// the end of the sibling list.
fn apply_tree(
    tables: &mut Tables,
    row: NoteTree,
    source_id: &SourceId,
    local: &SourceId,
    now: DateTime<Utc>,
) -> ApplyOutcome {
    let placed = row.clone();
    let outcome = upsert(tables, Entity::NoteTree(row), source_id, now);
    if outcome.is_applied() && !placed.is_deleted {
        repair_positions(tables, &placed, local, now);
    }
    outcome
}

fn repair_positions(
    tables: &mut Tables,
    placed: &NoteTree,
    local: &SourceId,
    now: DateTime<Utc>,
) {
    let clashing: Vec<String> = tables
        .children_of(&placed.parent_note_id)
        .filter(|sibling| {
            sibling.note_tree_id != placed.note_tree_id
                && !sibling.is_deleted
                && sibling.note_position == placed.note_position
        })
        .map(|sibling| sibling.note_tree_id.clone())
        .collect();

    for note_tree_id in clashing {
        let next = tables
            .children_of(&placed.parent_note_id)
            .map(|sibling| sibling.note_position)
            .max()
            .unwrap_or(0)
            + 1;

        if let Some(sibling) = tables.notes_tree.get_mut(&note_tree_id) {
            warn!(
                note_tree_id = %note_tree_id,
                parent_note_id = %placed.parent_note_id,
                from = sibling.note_position,
                to = next,
                "moving sibling with duplicate position"
            );
            sibling.note_position = next;
            sibling.date_modified = now;
        }
        append_in(tables, EntityType::NoteTree, &note_tree_id, local, now);
    }
}

/// Sets the positions a reordering names; skipped when none of them move.
fn apply_reordering(
    tables: &mut Tables,
    reordering: NoteReordering,
    source_id: &SourceId,
    now: DateTime<Utc>,
) -> ApplyOutcome {
    let moves = reordering.ordering.iter().any(|(note_tree_id, position)| {
        tables.notes_tree.get(note_tree_id).is_some_and(|row| {
            row.parent_note_id == reordering.parent_note_id && row.note_position != *position
        })
    });
    if !moves {
        return ApplyOutcome::Skipped;
    }

    let parent_note_id = reordering.parent_note_id.clone();
    tables.upsert(Entity::NoteReordering(reordering));
    append_in(tables, EntityType::NoteReordering, &parent_note_id, source_id, now);
    ApplyOutcome::Applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use notesync_protocol::{Note, OptionEntry, RecentNote};
    use std::collections::BTreeMap;

    fn handlers() -> (Arc<Store>, UpdateHandlers) {
        let store = Arc::new(Store::open_in_memory());
        let config = SyncConfig::new(SourceId::new("local"));
        (store.clone(), UpdateHandlers::new(store, config))
    }

    fn note(id: &str, title: &str) -> Entity {
        let at = "2024-05-01T10:00:00Z".parse().unwrap();
        Entity::Note(Note {
            note_id: id.into(),
            note_title: title.into(),
            note_text: "text".into(),
            is_protected: false,
            is_deleted: false,
            date_created: at,
            date_modified: at,
        })
    }

    fn tree(id: &str, parent: &str, position: i64) -> NoteTree {
        NoteTree {
            note_tree_id: id.into(),
            note_id: format!("note-{id}"),
            parent_note_id: parent.into(),
            note_position: position,
            prefix: None,
            is_expanded: false,
            is_deleted: false,
            date_modified: "2024-05-01T10:00:00Z".parse().unwrap(),
        }
    }

    fn records(store: &Store) -> Vec<(EntityType, String, String)> {
        store.read(|t| {
            t.sync
                .values()
                .map(|r| (r.entity_type, r.entity_id.clone(), r.source_id.to_string()))
                .collect()
        })
    }

    #[test]
    fn apply_is_idempotent() {
        let (store, handlers) = handlers();
        let remote = SourceId::new("remote");

        assert_eq!(handlers.apply(note("n1", "a"), &remote).unwrap(), ApplyOutcome::Applied);
        assert_eq!(handlers.apply(note("n1", "a"), &remote).unwrap(), ApplyOutcome::Skipped);

        let log = records(&store);
        assert_eq!(log, vec![(EntityType::Note, "n1".into(), "remote".into())]);
    }

    #[test]
    fn different_snapshot_overwrites() {
        let (store, handlers) = handlers();
        let remote = SourceId::new("remote");
        handlers.apply(note("n1", "a"), &remote).unwrap();
        assert!(handlers.apply(note("n1", "b"), &remote).unwrap().is_applied());

        assert_eq!(store.read(|t| t.notes["n1"].note_title.clone()), "b");
        assert_eq!(records(&store).len(), 2);
    }

    #[test]
    fn unsynced_option_rejected() {
        let (store, handlers) = handlers();
        let option = Entity::Option(OptionEntry {
            opt_name: "last_synced_pull".into(),
            opt_value: "0".into(),
            date_modified: chrono::Utc::now(),
        });

        let outcome = handlers.apply(option, &SourceId::new("remote")).unwrap();
        assert_eq!(outcome, ApplyOutcome::rejected(OPTION_NOT_SYNCED));
        assert!(store.read(|t| t.options.is_empty() && t.sync.is_empty()));
    }

    #[test]
    fn revisions_are_insert_only() {
        let (store, handlers) = handlers();
        let at = chrono::Utc::now();
        let mut revision = NoteHistory {
            note_history_id: "h1".into(),
            note_id: "n1".into(),
            note_title: "v1".into(),
            note_text: "old".into(),
            is_protected: false,
            date_modified_from: at,
            date_modified_to: at,
        };
        let remote = SourceId::new("remote");
        assert!(handlers
            .apply(Entity::NoteHistory(revision.clone()), &remote)
            .unwrap()
            .is_applied());

        revision.note_text = "rewritten".into();
        assert_eq!(
            handlers.apply(Entity::NoteHistory(revision), &remote).unwrap(),
            ApplyOutcome::Skipped
        );
        assert_eq!(store.read(|t| t.notes_history["h1"].note_text.clone()), "old");
    }

    #[test]
    fn duplicate_tree_position_is_repaired() {
        let (store, handlers) = handlers();
        let local = SourceId::new("local");
        let remote = SourceId::new("remote");

        handlers.apply(Entity::NoteTree(tree("t1", "root", 10)), &local).unwrap();
        handlers.apply(Entity::NoteTree(tree("t2", "root", 20)), &local).unwrap();
        handlers.apply(Entity::NoteTree(tree("t3", "root", 10)), &remote).unwrap();

        let (t1, t3) = store.read(|t| {
            (t.notes_tree["t1"].note_position, t.notes_tree["t3"].note_position)
        });
        assert_eq!(t3, 10);
        assert_eq!(t1, 21);

        let log = records(&store);
        assert_eq!(
            log.last().unwrap(),
            &(EntityType::NoteTree, "t1".to_string(), "local".to_string())
        );
    }

    #[test]
    fn reordering_moves_children() {
        let (store, handlers) = handlers();
        let local = SourceId::new("local");
        handlers.apply(Entity::NoteTree(tree("t1", "root", 10)), &local).unwrap();
        handlers.apply(Entity::NoteTree(tree("t2", "root", 20)), &local).unwrap();

        let mut ordering = BTreeMap::new();
        ordering.insert("t1".to_string(), 20);
        ordering.insert("t2".to_string(), 10);
        let reordering = Entity::NoteReordering(NoteReordering {
            parent_note_id: "root".into(),
            ordering,
        });

        let remote = SourceId::new("remote");
        assert!(handlers.apply(reordering.clone(), &remote).unwrap().is_applied());
        assert_eq!(handlers.apply(reordering, &remote).unwrap(), ApplyOutcome::Skipped);
        assert_eq!(store.read(|t| t.notes_tree["t1"].note_position), 20);
    }

    #[test]
    fn recent_note_upsert() {
        let (_, handlers) = handlers();
        let recent = Entity::RecentNote(RecentNote {
            note_tree_id: "t1".into(),
            note_path: "root/n1".into(),
            date_accessed: chrono::Utc::now(),
            is_deleted: false,
        });
        let remote = SourceId::new("remote");
        assert!(handlers.apply(recent.clone(), &remote).unwrap().is_applied());
        assert_eq!(handlers.apply(recent, &remote).unwrap(), ApplyOutcome::Skipped);
    }
}
