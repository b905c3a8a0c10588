//! Wire protocol between the client and the remote store.
//!
//! All messages are JSON with camelCase field names.
//!
//! ## Push
//!
//! ```text
//! POST /sync/push
//! { "clientId": "...", "mutations": [PushMutation, ...] }
//! -> { "results": [{ "mutationId": "...", "outcome": { "type": "acknowledged", "snapshot": {...} } }] }
//! ```
//!
//! ## Pull
//!
//! ```text
//! GET /sync/pull?cursor=<opaque>&limit=<n>
//! -> { "snapshots": [...], "cursor": "...", "hasMore": false }
//! ```

use crate::{
    EntityId, EntitySnapshot, EntityType, Error, Mutation, MutationId, MutationOp, Result,
    Revision, Timestamp, UserId,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A mutation as sent to the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMutation {
    pub id: MutationId,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub op: MutationOp,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Revision the client believes is current; `None` expects no entity
    pub base_revision: Option<Revision>,
    #[serde(default)]
    pub author: Option<UserId>,
    #[serde(default)]
    pub client_timestamp: Timestamp,
}

impl From<&Mutation> for PushMutation {
    fn from(m: &Mutation) -> Self {
        Self {
            id: m.id.clone(),
            entity_type: m.entity_type.clone(),
            entity_id: m.entity_id.clone(),
            op: m.op,
            payload: m.payload.clone(),
            base_revision: m.base_revision,
            author: m.author.clone(),
            client_timestamp: m.client_timestamp,
        }
    }
}

/// Request body for a push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    /// Identifies the pushing device
    pub client_id: String,
    pub mutations: Vec<PushMutation>,
}

/// What the remote store did with one mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MutationOutcome {
    /// Applied; carries the entity as it now stands
    Acknowledged { snapshot: EntitySnapshot },
    /// Refused for a reason retrying will not fix
    Rejected { reason: String },
    /// Base revision is stale; carries the current server state, if any
    Conflicted { server: Option<EntitySnapshot> },
}

impl MutationOutcome {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, MutationOutcome::Acknowledged { .. })
    }

    pub fn is_conflicted(&self) -> bool {
        matches!(self, MutationOutcome::Conflicted { .. })
    }
}

/// Outcome for one pushed mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResult {
    pub mutation_id: MutationId,
    pub outcome: MutationOutcome,
}

/// Response body for a push.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub results: Vec<PushResult>,
}

/// Response body for a pull.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    /// Entities changed after the request cursor, oldest change first
    pub snapshots: Vec<EntitySnapshot>,
    /// Cursor to pass to the next pull
    pub cursor: Cursor,
    /// More changes are available past `cursor`
    #[serde(default)]
    pub has_more: bool,
}

/// Opaque, monotonic pointer into the remote change stream.
///
/// The empty cursor means "from the beginning".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The cursor before any change.
    pub fn beginning() -> Self {
        Self::default()
    }

    pub fn is_beginning(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Cursor positioned after the change with the given sequence number.
    pub fn from_sequence(seq: u64) -> Self {
        Self(seq.to_string())
    }

    /// Decode a sequence-number cursor. The empty cursor is sequence 0.
    pub fn sequence(&self) -> Result<u64> {
        if self.0.is_empty() {
            return Ok(0);
        }
        self.0
            .parse()
            .map_err(|_| Error::InvalidCursor(self.0.clone()))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
