//! Error types for the sync engine.

use notesync_protocol::ProtocolError;
use notesync_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Protocol error (malformed message).
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The peer refused a request (validation failure on its side).
    #[error("rejected by peer: {0}")]
    Rejected(String),

    /// The peer reported an internal failure.
    #[error("server error: {0}")]
    ServerError(String),

    /// Storage failure while reading or applying.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// The in-flight cycle this call joined failed.
    #[error("joined sync cycle failed: {0}")]
    CycleFailed(String),

    /// The scheduler task is no longer running.
    #[error("sync scheduler stopped")]
    SchedulerStopped,

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Not connected.
    #[error("not connected to peer")]
    NotConnected,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    ///
    /// Retryable errors leave the watermark where it was so the next cycle
    /// requests the same range again.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::NotConnected => true,
            SyncError::ServerError(_) => true,
            _ => false,
        }
    }

    /// Returns true for a per-entity validation failure that must not abort
    /// the surrounding batch.
    pub fn is_validation_failure(&self) -> bool {
        matches!(self, SyncError::Rejected(_) | SyncError::Protocol(_))
    }
}
