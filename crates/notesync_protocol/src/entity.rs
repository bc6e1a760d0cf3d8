//! Entity snapshots exchanged between replicas.
//!
//! The sync engine treats every entity as a bag of fields identified by its
//! primary key. Snapshots are compared field by field; there is no field
//! level merge.

use crate::change::EntityType;
use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A record type that belongs to one synced collection.
pub trait SyncEntity: Serialize + DeserializeOwned + Clone + PartialEq {
    /// The collection this record lives in.
    const ENTITY_TYPE: EntityType;

    /// Primary key value.
    fn entity_id(&self) -> &str;
}

/// A note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Primary key.
    pub note_id: String,
    /// Title.
    pub note_title: String,
    /// Content.
    pub note_text: String,
    /// Whether the content is protected.
    pub is_protected: bool,
    /// Soft-delete flag.
    pub is_deleted: bool,
    /// Creation time.
    pub date_created: DateTime<Utc>,
    /// Last modification time.
    pub date_modified: DateTime<Utc>,
}

/// Placement of a note under a parent, with an explicit ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteTree {
    /// Primary key.
    pub note_tree_id: String,
    /// The placed note.
    pub note_id: String,
    /// The parent note.
    pub parent_note_id: String,
    /// Position among siblings sharing `parent_note_id`.
    pub note_position: i64,
    /// Optional display prefix.
    pub prefix: Option<String>,
    /// Whether the subtree is expanded in the tree view.
    pub is_expanded: bool,
    /// Soft-delete flag.
    pub is_deleted: bool,
    /// Last modification time.
    pub date_modified: DateTime<Utc>,
}

/// Immutable revision of a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteHistory {
    /// Primary key.
    pub note_history_id: String,
    /// The note this revision belongs to.
    pub note_id: String,
    /// Title at the time of the revision.
    pub note_title: String,
    /// Content at the time of the revision.
    pub note_text: String,
    /// Whether the content is protected.
    pub is_protected: bool,
    /// Start of the period this revision covers.
    pub date_modified_from: DateTime<Utc>,
    /// End of the period this revision covers.
    pub date_modified_to: DateTime<Utc>,
}

/// A name/value option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionEntry {
    /// Primary key.
    pub opt_name: String,
    /// Value.
    pub opt_value: String,
    /// Last modification time.
    pub date_modified: DateTime<Utc>,
}

/// A recently viewed note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentNote {
    /// Primary key: the tree placement that was visited.
    pub note_tree_id: String,
    /// Path of note ids from the root.
    pub note_path: String,
    /// Visit time.
    pub date_accessed: DateTime<Utc>,
    /// Soft-delete flag.
    pub is_deleted: bool,
}

/// The sibling ordering under one parent note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteReordering {
    /// Primary key: the parent note.
    pub parent_note_id: String,
    /// `note_tree_id` → `note_position`.
    pub ordering: BTreeMap<String, i64>,
}

impl SyncEntity for Note {
    const ENTITY_TYPE: EntityType = EntityType::Note;

    fn entity_id(&self) -> &str {
        &self.note_id
    }
}

impl SyncEntity for NoteTree {
    const ENTITY_TYPE: EntityType = EntityType::NoteTree;

    fn entity_id(&self) -> &str {
        &self.note_tree_id
    }
}

impl SyncEntity for NoteHistory {
    const ENTITY_TYPE: EntityType = EntityType::NoteHistory;

    fn entity_id(&self) -> &str {
        &self.note_history_id
    }
}

impl SyncEntity for OptionEntry {
    const ENTITY_TYPE: EntityType = EntityType::Option;

    fn entity_id(&self) -> &str {
        &self.opt_name
    }
}

impl SyncEntity for RecentNote {
    const ENTITY_TYPE: EntityType = EntityType::RecentNote;

    fn entity_id(&self) -> &str {
        &self.note_tree_id
    }
}

impl SyncEntity for NoteReordering {
    const ENTITY_TYPE: EntityType = EntityType::NoteReordering;

    fn entity_id(&self) -> &str {
        &self.parent_note_id
    }
}

/// A snapshot of any synced entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    /// A note.
    Note(Note),
    /// A tree placement.
    NoteTree(NoteTree),
    /// A note revision.
    NoteHistory(NoteHistory),
    /// An option.
    Option(OptionEntry),
    /// A recently viewed note.
    RecentNote(RecentNote),
    /// A sibling ordering.
    NoteReordering(NoteReordering),
}

impl Entity {
    /// Returns the collection of this snapshot.
    pub fn entity_type(&self) -> EntityType {
        match self {
            Entity::Note(_) => EntityType::Note,
            Entity::NoteTree(_) => EntityType::NoteTree,
            Entity::NoteHistory(_) => EntityType::NoteHistory,
            Entity::Option(_) => EntityType::Option,
            Entity::RecentNote(_) => EntityType::RecentNote,
            Entity::NoteReordering(_) => EntityType::NoteReordering,
        }
    }

    /// Returns the primary key value.
    pub fn entity_id(&self) -> &str {
        match self {
            Entity::Note(e) => e.entity_id(),
            Entity::NoteTree(e) => e.entity_id(),
            Entity::NoteHistory(e) => e.entity_id(),
            Entity::Option(e) => e.entity_id(),
            Entity::RecentNote(e) => e.entity_id(),
            Entity::NoteReordering(e) => e.entity_id(),
        }
    }

    /// Encodes the snapshot as a JSON value (the record fields only; the
    /// type travels separately, in the request path).
    pub fn to_value(&self) -> ProtocolResult<serde_json::Value> {
        let value = match self {
            Entity::Note(e) => serde_json::to_value(e)?,
            Entity::NoteTree(e) => serde_json::to_value(e)?,
            Entity::NoteHistory(e) => serde_json::to_value(e)?,
            Entity::Option(e) => serde_json::to_value(e)?,
            Entity::RecentNote(e) => serde_json::to_value(e)?,
            Entity::NoteReordering(e) => serde_json::to_value(e)?,
        };
        Ok(value)
    }

    /// Decodes a snapshot of the given type from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not match the record layout of
    /// `entity_type` or its primary key is empty.
    pub fn from_value(entity_type: EntityType, value: serde_json::Value) -> ProtocolResult<Self> {
        let entity = match entity_type {
            EntityType::Note => Entity::Note(serde_json::from_value(value)?),
            EntityType::NoteTree => Entity::NoteTree(serde_json::from_value(value)?),
            EntityType::NoteHistory => Entity::NoteHistory(serde_json::from_value(value)?),
            EntityType::Option => Entity::Option(serde_json::from_value(value)?),
            EntityType::RecentNote => Entity::RecentNote(serde_json::from_value(value)?),
            EntityType::NoteReordering => Entity::NoteReordering(serde_json::from_value(value)?),
        };

        if entity.entity_id().is_empty() {
            return Err(ProtocolError::invalid_entity(
                entity_type.as_str(),
                format!("empty {}", entity_type.key_column()),
            ));
        }

        Ok(entity)
    }
}

impl From<Note> for Entity {
    fn from(e: Note) -> Self {
        Entity::Note(e)
    }
}

impl From<NoteTree> for Entity {
    fn from(e: NoteTree) -> Self {
        Entity::NoteTree(e)
    }
}

impl From<NoteHistory> for Entity {
    fn from(e: NoteHistory) -> Self {
        Entity::NoteHistory(e)
    }
}

impl From<OptionEntry> for Entity {
    fn from(e: OptionEntry) -> Self {
        Entity::Option(e)
    }
}

impl From<RecentNote> for Entity {
    fn from(e: RecentNote) -> Self {
        Entity::RecentNote(e)
    }
}

impl From<NoteReordering> for Entity {
    fn from(e: NoteReordering) -> Self {
        Entity::NoteReordering(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn note(id: &str) -> Note {
        let now = Utc::now();
        Note {
            note_id: id.into(),
            note_title: "Title".into(),
            note_text: "Body".into(),
            is_protected: false,
            is_deleted: false,
            date_created: now,
            date_modified: now,
        }
    }

    #[test]
    fn identity_dispatch() {
        let entity = Entity::from(note("n1"));
        assert_eq!(entity.entity_type(), EntityType::Note);
        assert_eq!(entity.entity_id(), "n1");

        let reordering = Entity::from(NoteReordering {
            parent_note_id: "root".into(),
            ordering: BTreeMap::new(),
        });
        assert_eq!(reordering.entity_type(), EntityType::NoteReordering);
        assert_eq!(reordering.entity_id(), "root");
    }

    #[test]
    fn value_decoding_is_keyed_by_type() {
        let entity = Entity::from(note("n1"));
        let value = entity.to_value().unwrap();

        let decoded = Entity::from_value(EntityType::Note, value.clone()).unwrap();
        assert_eq!(decoded, entity);

        // The same fields do not form a tree placement.
        assert!(Entity::from_value(EntityType::NoteTree, value).is_err());
    }

    #[test]
    fn empty_primary_key_rejected() {
        let value = json!({
            "opt_name": "",
            "opt_value": "x",
            "date_modified": "2024-01-01T00:00:00Z"
        });
        let err = Entity::from_value(EntityType::Option, value).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidEntity { .. }));
    }
}
