//! Conflict records.
//!
//! A conflict is never resolved here. The record captures both sides so that
//! someone outside the engine can decide: discard the local mutation, or
//! re-submit it on top of the remote state.

use crate::{
    EntityId, EntityKey, EntitySnapshot, EntityType, Mutation, MutationId, Revision, Timestamp,
};
use serde::{Deserialize, Serialize};

/// A divergence between a local mutation and the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    /// Mutation parked as conflicted
    pub mutation_id: MutationId,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    /// What the local mutation intended to write
    pub local_payload: serde_json::Value,
    /// Revision the local mutation was based on
    pub local_base_revision: Option<Revision>,
    /// Current server payload (`null` if the entity does not exist remotely)
    pub remote_payload: serde_json::Value,
    /// Current server revision, if the entity exists remotely
    pub remote_revision: Option<Revision>,
    /// Whether the remote entity is a tombstone
    #[serde(default)]
    pub remote_deleted: bool,
    pub detected_at: Timestamp,
}

impl ConflictRecord {
    /// Build a record from a conflicted mutation and the server's state.
    pub fn detect(mutation: &Mutation, server: Option<&EntitySnapshot>, now: Timestamp) -> Self {
        Self {
            mutation_id: mutation.id.clone(),
            entity_type: mutation.entity_type.clone(),
            entity_id: mutation.entity_id.clone(),
            local_payload: mutation.payload.clone(),
            local_base_revision: mutation.base_revision,
            remote_payload: server.map_or(serde_json::Value::Null, |s| s.payload.clone()),
            remote_revision: server.map(|s| s.revision),
            remote_deleted: server.is_some_and(|s| s.deleted),
            detected_at: now,
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type.clone(), self.entity_id.clone())
    }

    /// Snapshot of the remote side, if the entity exists remotely.
    pub fn remote_snapshot(&self) -> Option<EntitySnapshot> {
        self.remote_revision.map(|revision| EntitySnapshot {
            entity_type: self.entity_type.clone(),
            entity_id: self.entity_id.clone(),
            payload: self.remote_payload.clone(),
            revision,
            deleted: self.remote_deleted,
            last_synced_at: self.detected_at,
        })
    }
}
