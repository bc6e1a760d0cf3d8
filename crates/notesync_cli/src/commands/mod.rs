//! CLI command implementations.

pub mod changed;
pub mod check;
pub mod inspect;
pub mod repair;
pub mod sync;

use notesync_engine::Replica;
use notesync_store::{Store, StoreConfig, StoreError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Result type of the CLI commands.
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Errors raised by the CLI itself.
#[derive(Error, Debug)]
pub enum CliError {
    /// A command needs `--path`.
    #[error("replica path required for {0}")]
    MissingPath(&'static str),

    /// Nothing at the given path.
    #[error("no replica found at {0}")]
    NoReplica(PathBuf),

    /// The replica is open in another process.
    #[error("replica at {0} is in use by another process")]
    InUse(PathBuf),
}

/// Output format of the read-only commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Human readable.
    Text,
    /// Pretty JSON.
    Json,
}

/// Opens an existing replica directory.
pub fn open_replica(path: &Path) -> CliResult<Arc<Replica>> {
    let config = StoreConfig::default().create_if_missing(false);
    let store = Store::open_with_config(path, config).map_err(|err| -> Box<dyn std::error::Error> {
        match err {
            StoreError::NotFound(path) => Box::new(CliError::NoReplica(path)),
            StoreError::Locked => Box::new(CliError::InUse(path.to_path_buf())),
            other => Box::new(other),
        }
    })?;
    Ok(Arc::new(Replica::open(Arc::new(store))?))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_replica_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_replica(&dir.path().join("absent")).unwrap_err();
        assert!(err.to_string().starts_with("no replica found at"));
    }

    #[test]
    fn open_replica_twice_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        testing::replica_with_notes(dir.path(), &["1"]);
        let _held = open_replica(dir.path()).unwrap();
        let err = open_replica(dir.path()).unwrap_err();
        assert!(err.to_string().contains("in use"));
    }
}
