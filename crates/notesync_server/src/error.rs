//! Error types for the sync server.

use notesync_engine::{HttpResponse, SyncError};
use notesync_protocol::{encode, ErrorResponse, ProtocolError};
use notesync_store::StoreError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing, malformed or expired token.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The request was understood but refused.
    #[error("{0}")]
    Rejected(String),

    /// No such route.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation needs a collaborator that is not configured.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// A sync cycle failed.
    #[error("sync failed: {0}")]
    Sync(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// The HTTP status this error is reported with.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 400,
            ServerError::NotAuthorized(_) => 401,
            ServerError::Rejected(_) => 403,
            ServerError::NotFound(_) => 404,
            ServerError::Unavailable(_) => 409,
            ServerError::Storage(_) | ServerError::Sync(_) | ServerError::Internal(_) => 500,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// Renders the error as a `{ "error": message }` response.
    pub fn to_response(&self) -> HttpResponse {
        let body = encode(&ErrorResponse::new(self.to_string())).unwrap_or_default();
        HttpResponse::new(self.status_code(), body)
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::UnknownEntityType(name) => ServerError::NotFound(name),
            other => ServerError::InvalidRequest(other.to_string()),
        }
    }
}

impl From<SyncError> for ServerError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Rejected(message) => ServerError::Rejected(message),
            SyncError::Protocol(err) => err.into(),
            SyncError::Store(err) => ServerError::Storage(err),
            other => ServerError::Sync(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notesync_protocol::decode;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
        assert_eq!(ServerError::Unavailable("no peer".into()).status_code(), 409);
        assert_eq!(ServerError::Storage(StoreError::Locked).status_code(), 500);
    }

    #[test]
    fn sync_errors_keep_their_class() {
        let rejected: ServerError =
            SyncError::Rejected("This option can't be synced.".into()).into();
        assert_eq!(rejected.status_code(), 403);
        assert_eq!(rejected.to_string(), "This option can't be synced.");

        let unknown: ServerError =
            SyncError::Protocol(ProtocolError::UnknownEntityType("attributes".into())).into();
        assert_eq!(unknown.status_code(), 404);

        let failed: ServerError = SyncError::transport_retryable("connection refused").into();
        assert!(failed.is_server_error());
    }

    #[test]
    fn error_body() {
        let response = ServerError::Rejected("nope".into()).to_response();
        assert_eq!(response.status, 403);
        let body: ErrorResponse = decode(&response.body).unwrap();
        assert_eq!(body.error, "nope");
    }
}
