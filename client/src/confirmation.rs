//! Feeds reconciled data into the match confirmation state machine.
//!
//! Only snapshots the remote store produced reach the tracker: acknowledgments
//! of our own pushes and pulled changes. A score still sitting in the outbox
//! never moves a match.

use crate::error::SyncResult;
use crate::store::{LocalStore, WriteOp};
use matchsync_engine::{
    ConfirmationEvent, EntityId, EntitySnapshot, MatchConfirmation, MatchRecord, ScoreSubmission,
    ScoreTolerance, Transition, MATCH_ENTITY, SCORE_SUBMISSION_ENTITY,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A status change of one match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationChange<'a> {
    pub match_id: &'a str,
    pub transition: Transition,
}

/// What observing a group of snapshots produced.
#[derive(Debug, Default)]
pub struct ConfirmationUpdate {
    /// Confirmation states to persist with the snapshots
    pub writes: Vec<WriteOp>,
    /// Transitions that fired, in order
    pub transitions: Vec<(EntityId, Transition)>,
}

impl ConfirmationUpdate {
    pub fn changes(&self) -> impl Iterator<Item = ConfirmationChange<'_>> {
        self.transitions.iter().map(|(match_id, transition)| ConfirmationChange {
            match_id,
            transition: *transition,
        })
    }
}

pub struct ConfirmationTracker {
    store: Arc<dyn LocalStore>,
    tolerance: ScoreTolerance,
}

impl ConfirmationTracker {
    pub fn new(store: Arc<dyn LocalStore>, tolerance: ScoreTolerance) -> Self {
        Self { store, tolerance }
    }

    pub fn tolerance(&self) -> &ScoreTolerance {
        &self.tolerance
    }

    /// Current state of a match, `pending` if nothing was observed yet.
    pub fn state(&self, match_id: &str) -> SyncResult<MatchConfirmation> {
        Ok(self
            .store
            .confirmation(match_id)?
            .unwrap_or_else(|| MatchConfirmation::new(match_id)))
    }

    /// Run reconciled snapshots through the state machine.
    ///
    /// Nothing is written here; the returned writes belong in the same
    /// transaction as the snapshots themselves.
    pub fn observe(&self, snapshots: &[EntitySnapshot]) -> SyncResult<ConfirmationUpdate> {
        let mut states: BTreeMap<EntityId, MatchConfirmation> = BTreeMap::new();
        let mut update = ConfirmationUpdate::default();

        for snapshot in snapshots.iter().filter(|s| s.is_active()) {
            let event = match snapshot.entity_type.as_str() {
                MATCH_ENTITY => match MatchRecord::from_snapshot(snapshot) {
                    Ok(record) => Observed::Match(record),
                    Err(e) => {
                        skip(snapshot, &e);
                        continue;
                    }
                },
                SCORE_SUBMISSION_ENTITY => match ScoreSubmission::from_snapshot(snapshot) {
                    Ok(submission) => Observed::Score(submission),
                    Err(e) => {
                        skip(snapshot, &e);
                        continue;
                    }
                },
                _ => continue,
            };

            let match_id = event.match_id().to_string();
            if !states.contains_key(&match_id) {
                let state = self.state(&match_id)?;
                states.insert(match_id.clone(), state);
            }
            let Some(current) = states.get_mut(&match_id) else {
                continue;
            };

            // Work on a copy so a refused event leaves no trace
            let mut next = current.clone();
            let result = match event {
                Observed::Match(record) => {
                    next.observe_match(&record, snapshot.revision, &self.tolerance)
                }
                Observed::Score(submission) => {
                    next.apply(ConfirmationEvent::ScoreSynced(submission), &self.tolerance)
                }
            };
            match result {
                Ok(transition) => {
                    if next == *current {
                        continue;
                    }
                    *current = next;
                    if let Some(transition) = transition {
                        tracing::info!(
                            match_id = %match_id,
                            from = %transition.from,
                            to = %transition.to,
                            "match confirmation changed"
                        );
                        update.transitions.push((match_id, transition));
                    }
                }
                Err(e) => skip(snapshot, &e),
            }
        }

        for (match_id, state) in states {
            let stored = self.store.confirmation(&match_id)?;
            if stored.as_ref() != Some(&state) {
                update.writes.push(WriteOp::PutConfirmation(state));
            }
        }
        Ok(update)
    }
}

enum Observed {
    Match(MatchRecord),
    Score(ScoreSubmission),
}

impl Observed {
    fn match_id(&self) -> &str {
        match self {
            Observed::Match(record) => &record.match_id,
            Observed::Score(submission) => &submission.match_id,
        }
    }
}

fn skip(snapshot: &EntitySnapshot, error: &matchsync_engine::Error) {
    tracing::warn!(
        entity = %snapshot.key(),
        revision = snapshot.revision,
        error = %error,
        "ignoring snapshot for match confirmation"
    );
}
