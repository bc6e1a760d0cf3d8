//! # NoteSync Protocol
//!
//! Data model and wire messages of the NoteSync replication protocol.
//!
//! This crate provides:
//! - `ChangeRecord`, `EntityType`, `SourceId` for the change log
//! - Entity snapshots (`Note`, `NoteTree`, `NoteHistory`, `OptionEntry`,
//!   `RecentNote`, `NoteReordering`) and the `Entity` variant over them
//! - Request/response bodies of the sync endpoints
//! - JSON encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod entity;
mod error;
mod messages;

pub use change::{ChangeRecord, EntityType, SourceId};
pub use entity::{
    Entity, Note, NoteHistory, NoteReordering, NoteTree, OptionEntry, RecentNote, SyncEntity,
};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    decode, encode, Ack, ApplyOutcome, CheckResponse, EntityResponse, ErrorResponse,
    UpdateRequest,
};
