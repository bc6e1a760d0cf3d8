//! Transactional access to the tables.

use crate::dir::StoreDir;
use crate::error::{StoreError, StoreResult};
use crate::tables::Tables;
use parking_lot::RwLock;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::path::Path;

/// Options for opening a store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Create the store directory if it does not exist.
    pub create_if_missing: bool,
    /// Persist the snapshot after every committed transaction.
    ///
    /// Each write rewrites the whole snapshot, so a bulk import of N rows
    /// through one transaction per row costs O(N²) bytes. Turn this off and
    /// call [`Store::flush_pending`] at batch boundaries instead; the sync
    /// engine does so once per cycle.
    pub flush_on_commit: bool,
}

impl StoreConfig {
    /// Sets whether a missing store is created.
    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    /// Sets whether every commit is persisted.
    pub fn flush_on_commit(mut self, flush: bool) -> Self {
        self.flush_on_commit = flush;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            flush_on_commit: true,
        }
    }
}

/// A working copy of the tables inside [`Store::transaction`].
///
/// Changes become visible to other readers only when the transaction body
/// returns `Ok`.
pub struct Transaction {
    tables: Tables,
}

impl Deref for Transaction {
    type Target = Tables;

    fn deref(&self) -> &Tables {
        &self.tables
    }
}

impl DerefMut for Transaction {
    fn deref_mut(&mut self) -> &mut Tables {
        &mut self.tables
    }
}

/// The tables of one replica behind a reader/writer lock.
///
/// # Transactions
///
/// A transaction holds the write lock for its whole body, so transactions
/// are serialized with respect to each other and to change log appends.
/// The body works on a copy of the tables; the copy replaces the committed
/// state only when the body succeeds (and, for an on-disk store with
/// `flush_on_commit`, only once the snapshot is written).
///
/// # Example
///
/// ```rust
/// use notesync_store::Store;
///
/// let store = Store::open_in_memory();
/// store
///     .transaction(|txn| {
///         txn.next_sync_id += 1;
///         Ok::<_, notesync_store::StoreError>(())
///     })
///     .unwrap();
/// assert_eq!(store.read(|t| t.next_sync_id), 2);
/// ```
pub struct Store {
    tables: RwLock<Tables>,
    dir: Option<StoreDir>,
    config: StoreConfig,
    dirty: AtomicBool,
}

impl Store {
    /// Opens an ephemeral store.
    pub fn open_in_memory() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            dir: None,
            config: StoreConfig::default(),
            dirty: AtomicBool::new(false),
        }
    }

    /// Opens an ephemeral store with pre-existing tables.
    pub fn with_tables(tables: Tables) -> Self {
        Self {
            tables: RwLock::new(tables),
            dir: None,
            config: StoreConfig::default(),
            dirty: AtomicBool::new(false),
        }
    }

    /// Opens an on-disk store with the default configuration.
    pub fn open(path: &Path) -> StoreResult<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Opens an on-disk store.
    ///
    /// # Errors
    ///
    /// Fails if the directory is locked by another process, missing (without
    /// `create_if_missing`), or holds an unreadable snapshot.
    pub fn open_with_config(path: &Path, config: StoreConfig) -> StoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;
        let tables = dir.load()?;
        tracing::debug!(
            path = %dir.path().display(),
            changes = tables.sync.len(),
            "opened store"
        );

        Ok(Self {
            tables: RwLock::new(tables),
            dir: Some(dir),
            config,
            dirty: AtomicBool::new(false),
        })
    }

    /// Returns the store directory, if on disk.
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(StoreDir::path)
    }

    /// Runs a read-only closure against the committed tables.
    pub fn read<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&Tables) -> T,
    {
        f(&*self.tables.read())
    }

    /// Returns a copy of the committed tables.
    pub fn snapshot(&self) -> Tables {
        self.tables.read().clone()
    }

    /// Executes a function within a transaction.
    ///
    /// If the function returns `Ok`, the transaction is committed.
    /// If it returns `Err`, the working copy is dropped and nothing changes.
    pub fn transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut committed = self.tables.write();
        let mut txn = Transaction {
            tables: committed.clone(),
        };

        let value = f(&mut txn)?;

        if let Some(dir) = &self.dir {
            if self.config.flush_on_commit {
                dir.save(&txn.tables)?;
            } else {
                self.dirty.store(true, Ordering::SeqCst);
            }
        }

        *committed = txn.tables;
        Ok(value)
    }

    /// Persists the committed tables (no-op for an in-memory store).
    pub fn flush(&self) -> StoreResult<()> {
        if let Some(dir) = &self.dir {
            let tables = self.tables.read();
            self.dirty.store(false, Ordering::SeqCst);
            dir.save(&tables)?;
        }
        Ok(())
    }

    /// Persists the committed tables if a commit has not been written yet.
    /// Returns whether anything was written.
    pub fn flush_pending(&self) -> StoreResult<bool> {
        if !self.dirty.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path())
            .field("config", &self.config)
            .finish()
    }
}
