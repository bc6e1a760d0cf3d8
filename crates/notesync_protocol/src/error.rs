//! Error types for the sync protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while interpreting protocol data.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The entity type name is not one of the synced collections.
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    /// A message or entity could not be encoded or decoded.
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The payload decoded but violates a structural rule.
    #[error("invalid {entity_type} entity: {message}")]
    InvalidEntity {
        /// Wire name of the entity type.
        entity_type: String,
        /// What is wrong with it.
        message: String,
    },
}

impl ProtocolError {
    /// Creates an invalid-entity error.
    pub fn invalid_entity(entity_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEntity {
            entity_type: entity_type.into(),
            message: message.into(),
        }
    }
}
