//! The relational tables of a replica.

use chrono::{DateTime, Utc};
use notesync_protocol::{
    ChangeRecord, Entity, EntityType, Note, NoteHistory, NoteReordering, NoteTree, OptionEntry,
    RecentNote,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// All tables of one replica.
///
/// Entity tables are keyed by primary key; the `sync` table is the change log
/// keyed by change id. `next_sync_id` is persisted separately from the rows so
/// deleting change records never causes an id to be handed out twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tables {
    /// Notes by `note_id`.
    #[serde(default)]
    pub notes: BTreeMap<String, Note>,
    /// Tree placements by `note_tree_id`.
    #[serde(default)]
    pub notes_tree: BTreeMap<String, NoteTree>,
    /// Revisions by `note_history_id`.
    #[serde(default)]
    pub notes_history: BTreeMap<String, NoteHistory>,
    /// Options by `opt_name`, synced and local alike.
    #[serde(default)]
    pub options: BTreeMap<String, OptionEntry>,
    /// Recently viewed notes by `note_tree_id`.
    #[serde(default)]
    pub recent_notes: BTreeMap<String, RecentNote>,
    /// Change log by change id.
    #[serde(default)]
    pub sync: BTreeMap<u64, ChangeRecord>,
    /// Next change id to hand out.
    #[serde(default = "first_sync_id")]
    pub next_sync_id: u64,
}

fn first_sync_id() -> u64 {
    1
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            notes: BTreeMap::new(),
            notes_tree: BTreeMap::new(),
            notes_history: BTreeMap::new(),
            options: BTreeMap::new(),
            recent_notes: BTreeMap::new(),
            sync: BTreeMap::new(),
            next_sync_id: first_sync_id(),
        }
    }
}

impl Tables {
    /// Returns true if the entity exists.
    ///
    /// A reordering exists while at least one tree row has it as parent.
    pub fn contains(&self, entity_type: EntityType, entity_id: &str) -> bool {
        match entity_type {
            EntityType::Note => self.notes.contains_key(entity_id),
            EntityType::NoteTree => self.notes_tree.contains_key(entity_id),
            EntityType::NoteHistory => self.notes_history.contains_key(entity_id),
            EntityType::Option => self.options.contains_key(entity_id),
            EntityType::RecentNote => self.recent_notes.contains_key(entity_id),
            EntityType::NoteReordering => self.children_of(entity_id).next().is_some(),
        }
    }

    /// Loads a snapshot of one entity.
    pub fn entity(&self, entity_type: EntityType, entity_id: &str) -> Option<Entity> {
        match entity_type {
            EntityType::Note => self.notes.get(entity_id).cloned().map(Entity::Note),
            EntityType::NoteTree => self.notes_tree.get(entity_id).cloned().map(Entity::NoteTree),
            EntityType::NoteHistory => self
                .notes_history
                .get(entity_id)
                .cloned()
                .map(Entity::NoteHistory),
            EntityType::Option => self.options.get(entity_id).cloned().map(Entity::Option),
            EntityType::RecentNote => self
                .recent_notes
                .get(entity_id)
                .cloned()
                .map(Entity::RecentNote),
            EntityType::NoteReordering => self.reordering(entity_id).map(Entity::NoteReordering),
        }
    }

    /// Primary keys of every row of a table, in key order.
    pub fn entity_ids(&self, entity_type: EntityType) -> Vec<String> {
        match entity_type {
            EntityType::Note => self.notes.keys().cloned().collect(),
            EntityType::NoteTree => self.notes_tree.keys().cloned().collect(),
            EntityType::NoteHistory => self.notes_history.keys().cloned().collect(),
            EntityType::Option => self.options.keys().cloned().collect(),
            EntityType::RecentNote => self.recent_notes.keys().cloned().collect(),
            EntityType::NoteReordering => {
                let mut parents: Vec<String> = self
                    .notes_tree
                    .values()
                    .map(|row| row.parent_note_id.clone())
                    .collect();
                parents.sort();
                parents.dedup();
                parents
            }
        }
    }

    /// Inserts or replaces a row. Reorderings are applied to the tree rows
    /// they name; unknown `note_tree_id`s are ignored.
    pub fn upsert(&mut self, entity: Entity) {
        match entity {
            Entity::Note(e) => {
                self.notes.insert(e.note_id.clone(), e);
            }
            Entity::NoteTree(e) => {
                self.notes_tree.insert(e.note_tree_id.clone(), e);
            }
            Entity::NoteHistory(e) => {
                self.notes_history.insert(e.note_history_id.clone(), e);
            }
            Entity::Option(e) => {
                self.options.insert(e.opt_name.clone(), e);
            }
            Entity::RecentNote(e) => {
                self.recent_notes.insert(e.note_tree_id.clone(), e);
            }
            Entity::NoteReordering(e) => {
                for (note_tree_id, position) in e.ordering {
                    if let Some(row) = self.notes_tree.get_mut(&note_tree_id) {
                        if row.parent_note_id == e.parent_note_id {
                            row.note_position = position;
                        }
                    }
                }
            }
        }
    }

    /// Removes a row. Returns true if it existed.
    pub fn remove(&mut self, entity_type: EntityType, entity_id: &str) -> bool {
        match entity_type {
            EntityType::Note => self.notes.remove(entity_id).is_some(),
            EntityType::NoteTree => self.notes_tree.remove(entity_id).is_some(),
            EntityType::NoteHistory => self.notes_history.remove(entity_id).is_some(),
            EntityType::Option => self.options.remove(entity_id).is_some(),
            EntityType::RecentNote => self.recent_notes.remove(entity_id).is_some(),
            EntityType::NoteReordering => false,
        }
    }

    /// Tree rows placed under `parent_note_id`.
    pub fn children_of<'a>(&'a self, parent_note_id: &'a str) -> impl Iterator<Item = &'a NoteTree> {
        self.notes_tree
            .values()
            .filter(move |row| row.parent_note_id == parent_note_id)
    }

    /// The current sibling ordering under a parent, if it has children.
    pub fn reordering(&self, parent_note_id: &str) -> Option<NoteReordering> {
        let ordering: BTreeMap<String, i64> = self
            .children_of(parent_note_id)
            .map(|row| (row.note_tree_id.clone(), row.note_position))
            .collect();

        if ordering.is_empty() {
            None
        } else {
            Some(NoteReordering {
                parent_note_id: parent_note_id.to_string(),
                ordering,
            })
        }
    }

    /// Reads an option value.
    pub fn option_value(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(|opt| opt.opt_value.as_str())
    }

    /// Writes an option value.
    pub fn set_option(&mut self, name: &str, value: impl Into<String>, now: DateTime<Utc>) {
        self.options.insert(
            name.to_string(),
            OptionEntry {
                opt_name: name.to_string(),
                opt_value: value.into(),
                date_modified: now,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(id: &str, parent: &str, position: i64) -> NoteTree {
        NoteTree {
            note_tree_id: id.into(),
            note_id: format!("note-{id}"),
            parent_note_id: parent.into(),
            note_position: position,
            prefix: None,
            is_expanded: false,
            is_deleted: false,
            date_modified: Utc::now(),
        }
    }

    #[test]
    fn empty_tables() {
        let tables = Tables::default();
        assert_eq!(tables.next_sync_id, 1);
        assert!(!tables.contains(EntityType::Note, "n1"));
        assert!(tables.entity(EntityType::NoteReordering, "root").is_none());
    }

    #[test]
    fn reordering_is_derived_from_tree() {
        let mut tables = Tables::default();
        tables.upsert(Entity::NoteTree(tree("t1", "root", 10)));
        tables.upsert(Entity::NoteTree(tree("t2", "root", 20)));
        tables.upsert(Entity::NoteTree(tree("t3", "other", 10)));

        assert!(tables.contains(EntityType::NoteReordering, "root"));
        assert_eq!(
            tables.entity_ids(EntityType::NoteReordering),
            vec!["other".to_string(), "root".to_string()]
        );

        let mut ordering = BTreeMap::new();
        ordering.insert("t1".to_string(), 30);
        ordering.insert("t3".to_string(), 99); // different parent, ignored
        tables.upsert(Entity::NoteReordering(NoteReordering {
            parent_note_id: "root".into(),
            ordering,
        }));

        assert_eq!(tables.notes_tree["t1"].note_position, 30);
        assert_eq!(tables.notes_tree["t3"].note_position, 10);

        let current = tables.reordering("root").unwrap();
        assert_eq!(current.ordering["t1"], 30);
        assert_eq!(current.ordering["t2"], 20);
    }

    #[test]
    fn options() {
        let mut tables = Tables::default();
        tables.set_option("last_synced_pull", "5", Utc::now());
        assert_eq!(tables.option_value("last_synced_pull"), Some("5"));
        assert!(tables.remove(EntityType::Option, "last_synced_pull"));
        assert_eq!(tables.option_value("last_synced_pull"), None);
    }
}
