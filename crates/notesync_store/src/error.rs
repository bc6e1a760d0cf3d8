//! Error types for store operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The persisted snapshot could not be read or written.
    #[error("store snapshot corrupted: {0}")]
    Corrupted(#[from] serde_json::Error),

    /// Another process holds the store directory.
    #[error("store locked: another process has exclusive access")]
    Locked,

    /// The store does not exist and creation was not requested.
    #[error("no store found at {0:?}")]
    NotFound(PathBuf),

    /// A transaction was aborted by its body.
    #[error("transaction aborted: {0}")]
    Aborted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            StoreError::Locked.to_string(),
            "store locked: another process has exclusive access"
        );
        let err = StoreError::Aborted("constraint".into());
        assert!(err.to_string().contains("constraint"));
    }
}
