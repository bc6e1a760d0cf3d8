//! Change records and the identifiers they carry.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The collection a change record refers to.
///
/// The wire name of each variant is the name of the table it describes and is
/// used verbatim as a path segment by the HTTP surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityType {
    /// A note (title, content, flags).
    #[serde(rename = "notes")]
    Note,
    /// Position of a note under a parent.
    #[serde(rename = "notes_tree")]
    NoteTree,
    /// Immutable snapshot of a note at a point in time.
    #[serde(rename = "notes_history")]
    NoteHistory,
    /// A synced name/value option.
    #[serde(rename = "options")]
    Option,
    /// A recently viewed note.
    #[serde(rename = "recent_notes")]
    RecentNote,
    /// Sibling ordering under one parent note.
    #[serde(rename = "notes_reordering")]
    NoteReordering,
}

impl EntityType {
    /// All entity types, in replication dispatch order.
    pub const ALL: [EntityType; 6] = [
        EntityType::Note,
        EntityType::NoteTree,
        EntityType::NoteHistory,
        EntityType::Option,
        EntityType::RecentNote,
        EntityType::NoteReordering,
    ];

    /// Entity types that own a table and therefore a content hash.
    pub const HASHED: [EntityType; 5] = [
        EntityType::Note,
        EntityType::NoteTree,
        EntityType::NoteHistory,
        EntityType::Option,
        EntityType::RecentNote,
    ];

    /// Returns the wire (table) name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Note => "notes",
            EntityType::NoteTree => "notes_tree",
            EntityType::NoteHistory => "notes_history",
            EntityType::Option => "options",
            EntityType::RecentNote => "recent_notes",
            EntityType::NoteReordering => "notes_reordering",
        }
    }

    /// Returns the name of the primary key column.
    pub fn key_column(&self) -> &'static str {
        match self {
            EntityType::Note => "note_id",
            EntityType::NoteTree => "note_tree_id",
            EntityType::NoteHistory => "note_history_id",
            EntityType::Option => "opt_name",
            EntityType::RecentNote => "note_tree_id",
            EntityType::NoteReordering => "parent_note_id",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        EntityType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownEntityType(s.to_string()))
    }
}

/// Opaque token identifying the replica (process) that produced a change.
///
/// Used to break replication loops: a replica never applies a pulled change
/// carrying its own id and never pushes a change back to the peer it came
/// from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    /// Source id of records created by the consistency repairer.
    pub const REPAIR: &'static str = "SYNC_FILL";

    /// Wraps an existing id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh replica id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// The reserved repair id.
    pub fn repair() -> Self {
        Self(Self::REPAIR.to_string())
    }

    /// Returns true for records written by the repairer rather than an edit.
    pub fn is_repair(&self) -> bool {
        self.0 == Self::REPAIR
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// One "this entity changed" event in the change log.
///
/// # Fields
///
/// - `id`: global logical clock, strictly increasing, assigned at append
/// - `entity_type` / `entity_id`: the changed entity
/// - `source_id`: the replica that produced the change
/// - `sync_date`: append timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// Change id.
    pub id: u64,
    /// Changed collection.
    pub entity_type: EntityType,
    /// Identity of the entity within its collection.
    pub entity_id: String,
    /// Replica that produced the change.
    pub source_id: SourceId,
    /// When the record was appended.
    pub sync_date: DateTime<Utc>,
}

impl ChangeRecord {
    /// Returns true if this record refers to the given entity.
    pub fn refers_to(&self, entity_type: EntityType, entity_id: &str) -> bool {
        self.entity_type == entity_type && self.entity_id == entity_id
    }
}
