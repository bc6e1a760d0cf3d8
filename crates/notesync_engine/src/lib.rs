//! # NoteSync Engine
//!
//! Replication engine for NoteSync replicas.
//!
//! This crate provides:
//! - The append-only change log and its logical clock
//! - Content hashes for a cheap "are we in sync" check
//! - Idempotent, loop-free update handlers per entity type
//! - The sync state machine (hash check → pull → push)
//! - Change log repair and full resync scheduling
//! - Transport abstraction with an HTTP implementation
//!
//! ## Architecture
//!
//! A [`Replica`] is the local end: store, identity, change log, handlers.
//! A [`SyncEngine`] pairs a replica with a [`PeerTransport`] and runs cycles:
//! 1. Compare content hashes and the peer's max change id with the watermark
//! 2. Pull peer records above the pull watermark, fetch and apply each entity
//! 3. Push local records above the push watermark, minus the peer's own
//!
//! ## Key Invariants
//!
//! - Change ids strictly increase and are never reused
//! - Applying an equal snapshot writes nothing
//! - A change never travels back to the replica it came from
//! - Watermarks never move past a record that was not fully processed
//! - At most one cycle runs per engine

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_log;
mod config;
mod content_hash;
mod error;
mod http;
mod repair;
mod replica;
mod scheduler;
mod state;
mod transport;
mod updates;
mod watermark;

pub use change_log::{append_in, max_id_in, ChangeLog};
pub use config::{RetryConfig, SyncConfig, DEFAULT_SYNCED_OPTIONS};
pub use content_hash::current_hashes;
pub use error::{SyncError, SyncResult};
pub use http::{
    HttpClient, HttpRequest, HttpResponse, HttpTransport, LoopbackClient, LoopbackServer, Method,
};
pub use repair::{ConsistencyRepairer, RepairReport};
pub use replica::{Replica, SOURCE_ID_OPTION};
pub use scheduler::SyncScheduler;
pub use state::{SyncCycleResult, SyncEngine, SyncOutcome, SyncRunner, SyncState, SyncStats};
pub use transport::{MockTransport, PeerTransport};
pub use updates::{UpdateHandlers, OPTION_NOT_SYNCED};
pub use watermark::{SyncWatermark, LAST_SYNCED_PULL, LAST_SYNCED_PUSH};
