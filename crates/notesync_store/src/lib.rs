//! # NoteSync Store
//!
//! The storage collaborator the sync engine runs against: the entity tables
//! of one replica, its change log table and its option store, with
//! serialized transactional execution.
//!
//! ## Design Principles
//!
//! - Tables are plain ordered maps keyed by primary key
//! - A transaction works on a copy and swaps it in on success
//! - On-disk stores persist a JSON snapshot in a locked directory
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Example
//!
//! ```rust
//! use notesync_store::Store;
//! use notesync_protocol::EntityType;
//!
//! let store = Store::open_in_memory();
//! assert!(!store.read(|t| t.contains(EntityType::Note, "root")));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod dir;
mod error;
mod store;
mod tables;

pub use error::{StoreError, StoreResult};
pub use store::{Store, StoreConfig, Transaction};
pub use tables::Tables;
