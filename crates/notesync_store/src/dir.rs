//! On-disk store directory.
//!
//! ```text
//! <store>/
//!   LOCK         exclusive process lock
//!   store.json   committed snapshot of all tables
//! ```

use crate::error::{StoreError, StoreResult};
use crate::tables::Tables;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const SNAPSHOT_FILE: &str = "store.json";
const SNAPSHOT_TMP_FILE: &str = "store.json.tmp";

/// A locked store directory.
///
/// The lock is held for the lifetime of this value and released when the
/// lock file handle is closed.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens (and optionally creates) a store directory and takes its lock.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the directory is missing and
    ///   `create_if_missing` is false
    /// - [`StoreError::Locked`] if another process holds the lock
    pub fn open(path: &Path, create_if_missing: bool) -> StoreResult<Self> {
        if !path.exists() {
            if !create_if_missing {
                return Err(StoreError::NotFound(path.to_path_buf()));
            }
            fs::create_dir_all(path)?;
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the committed snapshot, or empty tables for a new store.
    pub fn load(&self) -> StoreResult<Tables> {
        let snapshot = self.path.join(SNAPSHOT_FILE);
        if !snapshot.exists() {
            return Ok(Tables::default());
        }
        let bytes = fs::read(snapshot)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Writes a snapshot through a temporary file and renames it into place.
    pub fn save(&self, tables: &Tables) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(tables)?;
        let tmp = self.path.join(SNAPSHOT_TMP_FILE);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(tmp, self.path.join(SNAPSHOT_FILE))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("replica");

        let dir = StoreDir::open(&path, true).unwrap();
        assert!(path.exists());
        assert_eq!(dir.path(), path);
        assert_eq!(dir.load().unwrap(), Tables::default());
    }

    #[test]
    fn open_missing_without_create() {
        let temp = tempdir().unwrap();
        let result = StoreDir::open(&temp.path().join("missing"), false);
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn second_open_is_locked() {
        let temp = tempdir().unwrap();
        let _first = StoreDir::open(temp.path(), true).unwrap();
        let second = StoreDir::open(temp.path(), true);
        assert!(matches!(second, Err(StoreError::Locked)));
    }

    #[test]
    fn save_and_load() {
        let temp = tempdir().unwrap();
        let dir = StoreDir::open(temp.path(), true).unwrap();

        let mut tables = Tables::default();
        tables.next_sync_id = 42;
        dir.save(&tables).unwrap();

        assert_eq!(dir.load().unwrap().next_sync_id, 42);
        assert!(!temp.path().join(SNAPSHOT_TMP_FILE).exists());
    }
}
