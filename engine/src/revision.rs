//! Optimistic concurrency: what a remote store does with a pushed mutation.
//!
//! Every mutation names the revision its author last saw. The remote store
//! applies it only when that revision is still current; otherwise it reports a
//! conflict and leaves the entity untouched. No write is ever merged over a
//! newer one.
//!
//! | op     | entity absent              | live entity                  | tombstone |
//! |--------|----------------------------|------------------------------|-----------|
//! | create | apply at revision 1        | conflict                     | conflict  |
//! | update | reject (conflict if based) | apply if base matches        | reject    |
//! | delete | reject (conflict if based) | tombstone if base matches    | reject    |
//!
//! For updates and deletes the base revision is checked first, so a stale base
//! always reports a conflict.

use crate::confirmation::{ScoreSubmission, SCORE_SUBMISSION_ENTITY};
use crate::{EntityKey, EntitySnapshot, Error, MutationOp, PushMutation, Result};

/// Verdict for a single pushed mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Write the snapshot; it carries the next revision
    Apply(EntitySnapshot),
    /// Refuse the mutation permanently
    Reject(String),
    /// The base revision is stale
    Conflict,
}

/// Decide the fate of `mutation` given the entity's current server state.
pub fn decide(current: Option<&EntitySnapshot>, mutation: &PushMutation) -> Decision {
    let key = EntityKey::new(mutation.entity_type.clone(), mutation.entity_id.clone());
    if !key.is_valid() {
        return Decision::Reject("entity type and id are required".into());
    }

    let next = match (mutation.op, current) {
        (MutationOp::Create, Some(_)) => return Decision::Conflict,
        (MutationOp::Create, None) => EntitySnapshot::new(
            key.entity_type,
            key.entity_id,
            mutation.payload.clone(),
            1,
        ),
        (_, current) => {
            if mutation.base_revision != current.map(|s| s.revision) {
                return Decision::Conflict;
            }
            let Some(existing) = current else {
                return Decision::Reject(format!("{key} does not exist"));
            };
            if existing.deleted {
                return Decision::Reject(format!("{key} was deleted"));
            }

            let Some(revision) = existing.revision.checked_add(1) else {
                return Decision::Reject(format!("{key} has exhausted its revisions"));
            };
            let mut next = existing.clone();
            next.revision = revision;
            next.last_synced_at = 0;
            if mutation.op == MutationOp::Delete {
                next.deleted = true;
            } else {
                match merge_delta(&existing.payload, &mutation.payload) {
                    Ok(merged) => next.payload = merged,
                    Err(e) => return Decision::Reject(e.to_string()),
                }
            }
            next
        }
    };

    match validate(&next, mutation) {
        Ok(()) => Decision::Apply(next),
        Err(e) => Decision::Reject(e.to_string()),
    }
}

/// Shallow merge: top-level keys of `delta` replace those of `base`, and a
/// `null` value removes the key.
pub fn merge_delta(base: &serde_json::Value, delta: &serde_json::Value) -> Result<serde_json::Value> {
    let delta = delta
        .as_object()
        .ok_or_else(|| Error::InvalidPayload("update payload must be an object".into()))?;
    let mut merged = base.as_object().cloned().unwrap_or_default();
    for (key, value) in delta {
        if value.is_null() {
            merged.remove(key);
        } else {
            merged.insert(key.clone(), value.clone());
        }
    }
    Ok(serde_json::Value::Object(merged))
}

fn validate(snapshot: &EntitySnapshot, mutation: &PushMutation) -> Result<()> {
    if snapshot.deleted {
        return Ok(());
    }
    if !snapshot.payload.is_object() {
        return Err(Error::InvalidPayload("payload must be an object".into()));
    }
    if snapshot.entity_type == SCORE_SUBMISSION_ENTITY {
        let submission =
            ScoreSubmission::parse(&snapshot.entity_id, &snapshot.payload, snapshot.revision)?;
        if let Some(author) = &mutation.author {
            if *author != submission.player_id {
                return Err(Error::InvalidPayload(format!(
                    "{author} cannot submit a score for {}",
                    submission.player_id
                )));
            }
        }
    }
    Ok(())
}
