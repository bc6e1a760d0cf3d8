//! Request and response bodies of the sync endpoints.

use crate::change::{EntityType, SourceId};
use crate::entity::Entity;
use crate::error::ProtocolResult;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Encodes a message body as JSON.
pub fn encode<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Decodes a message body from JSON.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Answer to the `/check` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    /// Content digest per entity collection.
    pub hashes: BTreeMap<EntityType, String>,
    /// Highest change id in the peer's log (0 when empty).
    pub max_sync_id: u64,
    /// The peer's own replica id.
    pub source_id: SourceId,
}

/// Body of a single-entity fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EntityResponse {
    /// The snapshot, or `null` when the entity does not exist.
    pub entity: Option<serde_json::Value>,
}

impl EntityResponse {
    /// Wraps an optional snapshot.
    pub fn from_entity(entity: Option<&Entity>) -> ProtocolResult<Self> {
        let entity = entity.map(Entity::to_value).transpose()?;
        Ok(Self { entity })
    }

    /// Decodes the carried snapshot as the given type.
    pub fn into_entity(self, entity_type: EntityType) -> ProtocolResult<Option<Entity>> {
        self.entity
            .map(|value| Entity::from_value(entity_type, value))
            .transpose()
    }
}

/// Body of `PUT /{entityType}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    /// The snapshot to apply.
    pub entity: serde_json::Value,
    /// Replica that first produced the change.
    pub source_id: SourceId,
}

impl UpdateRequest {
    /// Creates an update request for a snapshot.
    pub fn new(entity: &Entity, source_id: SourceId) -> ProtocolResult<Self> {
        Ok(Self {
            entity: entity.to_value()?,
            source_id,
        })
    }

    /// Decodes the carried snapshot as the given type.
    pub fn into_entity(self, entity_type: EntityType) -> ProtocolResult<(Entity, SourceId)> {
        let entity = Entity::from_value(entity_type, self.entity)?;
        Ok((entity, self.source_id))
    }
}

/// Result of applying one incoming snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// Local state changed and a change record was appended.
    Applied,
    /// Local state already matched; nothing was written.
    Skipped,
    /// The snapshot failed local validation.
    Rejected {
        /// Why it was rejected.
        reason: String,
    },
}

impl ApplyOutcome {
    /// Creates a rejection.
    pub fn rejected(reason: impl Into<String>) -> Self {
        ApplyOutcome::Rejected {
            reason: reason.into(),
        }
    }

    /// Returns true if local state changed.
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied)
    }
}

/// Empty acknowledgement body (`{}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Ack {}

/// Error body returned with a non-success status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human readable message.
    pub error: String,
}

impl ErrorResponse {
    /// Creates an error body.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
