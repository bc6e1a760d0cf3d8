//! Sync watermarks.

use crate::error::{SyncError, SyncResult};
use chrono::Utc;
use notesync_store::{Store, Tables};

/// Option holding the highest peer change id already pulled.
pub const LAST_SYNCED_PULL: &str = "last_synced_pull";

/// Option holding the highest local change id already pushed.
pub const LAST_SYNCED_PUSH: &str = "last_synced_push";

/// How far this replica has exchanged changes with its peer.
///
/// Stored in the local option store. A missing or unparsable value reads as 0,
/// which makes the next cycle exchange the full log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncWatermark {
    /// Peer change id up to which changes were pulled.
    pub last_synced_pull: u64,
    /// Local change id up to which changes were pushed.
    pub last_synced_push: u64,
}

impl SyncWatermark {
    /// Reads the watermark from the tables.
    pub fn read(tables: &Tables) -> Self {
        Self {
            last_synced_pull: read_option(tables, LAST_SYNCED_PULL),
            last_synced_push: read_option(tables, LAST_SYNCED_PUSH),
        }
    }

    /// Loads the committed watermark.
    pub fn load(store: &Store) -> Self {
        store.read(Self::read)
    }

    /// Writes both values into the tables.
    pub fn write(&self, tables: &mut Tables) {
        let now = Utc::now();
        tables.set_option(LAST_SYNCED_PULL, self.last_synced_pull.to_string(), now);
        tables.set_option(LAST_SYNCED_PUSH, self.last_synced_push.to_string(), now);
    }

    /// Persists both values in one transaction.
    pub fn save(&self, store: &Store) -> SyncResult<()> {
        store.transaction(|txn| {
            self.write(txn);
            Ok::<_, SyncError>(())
        })
    }

    /// Resets both values to 0 in one transaction.
    pub fn reset(store: &Store) -> SyncResult<()> {
        Self::default().save(store)
    }
}

fn read_option(tables: &Tables, name: &str) -> u64 {
    match tables.option_value(name) {
        Some(value) => value.parse().unwrap_or_else(|_| {
            tracing::warn!(option = name, value, "unparsable watermark, starting from 0");
            0
        }),
        None => 0,
    }
}
