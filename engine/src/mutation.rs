//! Mutations: intended writes against a single entity.
//!
//! Changes are expressed as mutations rather than direct edits of snapshots.
//! A mutation lives in the outbox from the moment the user performs an action
//! until the remote store acknowledges it, rejects it, or reports a conflict.

use crate::{
    EntityId, EntityKey, EntityType, Error, MutationId, Revision, Timestamp, UserId,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of write a mutation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationOp {
    Create,
    Update,
    Delete,
}

impl MutationOp {
    /// Wire name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationOp::Create => "create",
            MutationOp::Update => "update",
            MutationOp::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(MutationOp::Create),
            "update" => Ok(MutationOp::Update),
            "delete" => Ok(MutationOp::Delete),
            other => Err(Error::InvalidPayload(format!("unknown operation '{other}'"))),
        }
    }
}

/// Lifecycle status of a mutation in the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationStatus {
    /// Waiting to be pushed (possibly backing off)
    Queued,
    /// Part of a batch currently being pushed
    InFlight,
    /// Accepted by the remote store
    Acknowledged,
    /// Rejected by the remote store; needs correction
    Failed,
    /// Based on a stale revision; needs external resolution
    Conflicted,
}

impl MutationStatus {
    /// Storage/wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationStatus::Queued => "queued",
            MutationStatus::InFlight => "in-flight",
            MutationStatus::Acknowledged => "acknowledged",
            MutationStatus::Failed => "failed",
            MutationStatus::Conflicted => "conflicted",
        }
    }

    /// Whether the mutation is parked until someone acts on it.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MutationStatus::Acknowledged | MutationStatus::Failed | MutationStatus::Conflicted
        )
    }

    /// Whether the mutation still heads toward the remote store.
    pub fn is_pending(&self) -> bool {
        matches!(self, MutationStatus::Queued | MutationStatus::InFlight)
    }
}

impl fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(MutationStatus::Queued),
            "in-flight" => Ok(MutationStatus::InFlight),
            "acknowledged" => Ok(MutationStatus::Acknowledged),
            "failed" => Ok(MutationStatus::Failed),
            "conflicted" => Ok(MutationStatus::Conflicted),
            other => Err(Error::InvalidStatus(other.to_string())),
        }
    }
}

/// An intended write against one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    /// Globally unique, client-generated id
    pub id: MutationId,
    /// Enqueue order, assigned by the outbox
    pub seq: u64,
    /// Target entity type
    pub entity_type: EntityType,
    /// Target entity id
    pub entity_id: EntityId,
    /// Operation kind
    pub op: MutationOp,
    /// Payload delta (full payload for creates)
    pub payload: serde_json::Value,
    /// Last server revision the client knew for the entity
    pub base_revision: Option<Revision>,
    /// User the mutation is attributed to
    pub author: Option<UserId>,
    /// When the user performed the action
    pub client_timestamp: Timestamp,
    /// Failed push attempts so far
    pub attempts: u32,
    /// Current lifecycle status
    pub status: MutationStatus,
    /// Earliest time the mutation may be pushed again
    pub next_attempt_at: Timestamp,
    /// Reason of the last failure, if any
    pub last_error: Option<String>,
}

impl Mutation {
    /// Create a new queued mutation. The sequence number is assigned on enqueue.
    pub fn new(
        id: impl Into<MutationId>,
        entity_type: impl Into<EntityType>,
        entity_id: impl Into<EntityId>,
        op: MutationOp,
        payload: serde_json::Value,
        base_revision: Option<Revision>,
        client_timestamp: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            seq: 0,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            op,
            payload,
            base_revision,
            author: None,
            client_timestamp,
            attempts: 0,
            status: MutationStatus::Queued,
            next_attempt_at: 0,
            last_error: None,
        }
    }

    /// Attribute the mutation to a user.
    pub fn with_author(mut self, author: impl Into<UserId>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// The entity this mutation targets.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type.clone(), self.entity_id.clone())
    }

    /// Whether this mutation targets the given entity.
    pub fn targets(&self, entity_type: &str, entity_id: &str) -> bool {
        self.entity_type == entity_type && self.entity_id == entity_id
    }

    /// Whether the mutation may be picked for a batch at `now`.
    pub fn is_eligible(&self, now: Timestamp) -> bool {
        self.status == MutationStatus::Queued && self.next_attempt_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            MutationStatus::Queued,
            MutationStatus::InFlight,
            MutationStatus::Acknowledged,
            MutationStatus::Failed,
            MutationStatus::Conflicted,
        ] {
            assert_eq!(status.as_str().parse::<MutationStatus>().unwrap(), status);
        }
        assert!("sent".parse::<MutationStatus>().is_err());
    }

    #[test]
    fn in_flight_serializes_kebab_case() {
        let json = serde_json::to_string(&MutationStatus::InFlight).unwrap();
        assert_eq!(json, "\"in-flight\"");
    }

    #[test]
    fn terminal_statuses() {
        assert!(!MutationStatus::Queued.is_terminal());
        assert!(!MutationStatus::InFlight.is_terminal());
        assert!(MutationStatus::Failed.is_terminal());
        assert!(MutationStatus::Conflicted.is_terminal());
    }

    #[test]
    fn eligibility_respects_backoff() {
        let mut m = Mutation::new("m1", "match", "x", MutationOp::Update, json!({}), Some(1), 0);
        assert!(m.is_eligible(0));

        m.next_attempt_at = 5_000;
        assert!(!m.is_eligible(4_999));
        assert!(m.is_eligible(5_000));

        m.status = MutationStatus::InFlight;
        assert!(!m.is_eligible(10_000));
    }

    #[test]
    fn serialization_format() {
        let m = Mutation::new("m1", "match", "x", MutationOp::Create, json!({"a": 1}), None, 42)
            .with_author("alice");
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"entityType\":\"match\""));
        assert!(json.contains("\"op\":\"create\""));
        assert!(json.contains("\"baseRevision\":null"));
        assert!(json.contains("\"author\":\"alice\""));
    }
}
