//! Entity snapshots: versioned copies of remote records.
//!
//! A snapshot is what the client knows about one entity as last confirmed by
//! the remote store. Snapshots are replaced wholesale, never patched locally.

use crate::{EntityId, EntityType, Revision, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical identity of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityKey {
    /// Entity type (e.g. `match`)
    pub entity_type: EntityType,
    /// Entity identifier, unique within its type
    pub entity_id: EntityId,
}

impl EntityKey {
    /// Create a new key.
    pub fn new(entity_type: impl Into<EntityType>, entity_id: impl Into<EntityId>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }

    /// Whether both parts of the key are non-empty.
    pub fn is_valid(&self) -> bool {
        !self.entity_type.is_empty() && !self.entity_id.is_empty()
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// A versioned copy of a remote record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySnapshot {
    /// Entity type
    pub entity_type: EntityType,
    /// Entity identifier
    pub entity_id: EntityId,
    /// Opaque structured payload
    pub payload: serde_json::Value,
    /// Server revision, monotonic per entity
    pub revision: Revision,
    /// Tombstone flag for deleted entities
    #[serde(default)]
    pub deleted: bool,
    /// When the client last received this snapshot (0 on the server side)
    #[serde(default)]
    pub last_synced_at: Timestamp,
}

impl EntitySnapshot {
    /// Create a live snapshot.
    pub fn new(
        entity_type: impl Into<EntityType>,
        entity_id: impl Into<EntityId>,
        payload: serde_json::Value,
        revision: Revision,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            payload,
            revision,
            deleted: false,
            last_synced_at: 0,
        }
    }

    /// The snapshot's entity key.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type.clone(), self.entity_id.clone())
    }

    /// Check if the entity is live (not a tombstone).
    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    /// Stamp the snapshot with the time it was received.
    pub fn synced_at(mut self, timestamp: Timestamp) -> Self {
        self.last_synced_at = timestamp;
        self
    }

    /// Whether this snapshot is strictly newer than `other`.
    pub fn supersedes(&self, other: &EntitySnapshot) -> bool {
        self.revision > other.revision
    }
}
