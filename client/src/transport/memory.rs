//! An in-process remote store.
//!
//! Applies pushed mutations with the same revision rules as the server and
//! keeps a change stream for pulls. Switches simulate outages, revoked
//! credentials and garbage responses; administrative helpers simulate other
//! devices and tournament staff.

use super::RemoteTransport;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use matchsync_engine::{
    decide, merge_delta, ConfirmationStatus, Cursor, Decision, EntityKey, EntitySnapshot,
    MutationId, MutationOutcome, PullResponse, PushRequest, PushResponse, PushResult, Revision,
    MATCH_ENTITY,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// One mutation the remote store applied, in application order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMutation {
    pub mutation_id: MutationId,
    pub client_id: String,
    pub entity: EntityKey,
    pub revision: Revision,
}

#[derive(Debug, Default)]
struct RemoteState {
    /// Entity -> (snapshot, change sequence of its last write)
    entities: BTreeMap<EntityKey, (EntitySnapshot, u64)>,
    change_seq: u64,
    /// Acknowledged mutation ids and the snapshot each produced
    acknowledged: HashMap<MutationId, EntitySnapshot>,
    log: Vec<AppliedMutation>,
}

impl RemoteState {
    fn write(&mut self, snapshot: EntitySnapshot) -> EntitySnapshot {
        self.change_seq += 1;
        self.entities
            .insert(snapshot.key(), (snapshot.clone(), self.change_seq));
        snapshot
    }
}

/// A [`RemoteTransport`] backed by an in-memory remote store.
#[derive(Debug, Default)]
pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
    offline: AtomicBool,
    unauthorized: AtomicBool,
    malformed: AtomicBool,
    push_delay: Mutex<Option<Duration>>,
    pushes: AtomicUsize,
    pulls: AtomicUsize,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the network being unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Simulate revoked credentials.
    pub fn set_unauthorized(&self, unauthorized: bool) {
        self.unauthorized.store(unauthorized, Ordering::SeqCst);
    }

    /// Answer with responses that violate the protocol.
    pub fn set_malformed(&self, malformed: bool) {
        self.malformed.store(malformed, Ordering::SeqCst);
    }

    /// Delay every push, to hold a cycle in flight.
    pub fn set_push_delay(&self, delay: Option<Duration>) {
        *self.push_delay.lock() = delay;
    }

    /// Number of push requests received.
    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    /// Number of pull requests received.
    pub fn pull_count(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    /// Current server state of an entity.
    pub fn get(&self, key: &EntityKey) -> Option<EntitySnapshot> {
        self.state.lock().entities.get(key).map(|(s, _)| s.clone())
    }

    /// Mutations applied so far, in order.
    pub fn applied(&self) -> Vec<AppliedMutation> {
        self.state.lock().log.clone()
    }

    /// Store a snapshot as-is, bypassing revision checks.
    pub fn seed(&self, snapshot: EntitySnapshot) {
        self.state.lock().write(snapshot);
    }

    /// Merge `payload` into an entity as another device would, creating it
    /// if needed. Returns the new server state.
    pub fn write_as_other_client(
        &self,
        entity_type: &str,
        entity_id: &str,
        payload: serde_json::Value,
    ) -> EntitySnapshot {
        let mut state = self.state.lock();
        let key = EntityKey::new(entity_type, entity_id);
        let next = match state.entities.get(&key) {
            Some((current, _)) => {
                let mut next = current.clone();
                next.payload = merge_delta(&current.payload, &payload)
                    .unwrap_or_else(|_| payload.clone());
                next.revision += 1;
                next.deleted = false;
                next
            }
            None => EntitySnapshot::new(entity_type, entity_id, payload, 1),
        };
        state.write(next)
    }

    /// Close the round of a match.
    pub fn close_round(&self, match_id: &str) -> EntitySnapshot {
        self.write_as_other_client(MATCH_ENTITY, match_id, json!({"roundClosed": true}))
    }

    /// Set a match's confirmation status after manual review.
    pub fn override_confirmation(&self, match_id: &str, status: ConfirmationStatus) -> EntitySnapshot {
        self.write_as_other_client(
            MATCH_ENTITY,
            match_id,
            json!({"confirmationOverride": status.as_str()}),
        )
    }

    fn check_reachable(&self) -> SyncResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::TransientNetwork("remote unreachable".into()));
        }
        if self.unauthorized.load(Ordering::SeqCst) {
            return Err(SyncError::Authorization("token rejected".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteTransport for InMemoryRemote {
    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        let delay = *self.push_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_reachable()?;
        self.pushes.fetch_add(1, Ordering::SeqCst);

        if self.malformed.load(Ordering::SeqCst) {
            return Ok(PushResponse::default());
        }

        let mut state = self.state.lock();
        let mut results = Vec::with_capacity(request.mutations.len());
        for mutation in &request.mutations {
            if let Some(snapshot) = state.acknowledged.get(&mutation.id) {
                results.push(PushResult {
                    mutation_id: mutation.id.clone(),
                    outcome: MutationOutcome::Acknowledged {
                        snapshot: snapshot.clone(),
                    },
                });
                continue;
            }

            let key = EntityKey::new(mutation.entity_type.clone(), mutation.entity_id.clone());
            let current = state.entities.get(&key).map(|(s, _)| s.clone());
            let outcome = match decide(current.as_ref(), mutation) {
                Decision::Apply(snapshot) => {
                    let snapshot = state.write(snapshot);
                    state
                        .acknowledged
                        .insert(mutation.id.clone(), snapshot.clone());
                    state.log.push(AppliedMutation {
                        mutation_id: mutation.id.clone(),
                        client_id: request.client_id.clone(),
                        entity: key,
                        revision: snapshot.revision,
                    });
                    MutationOutcome::Acknowledged { snapshot }
                }
                Decision::Reject(reason) => MutationOutcome::Rejected { reason },
                Decision::Conflict => MutationOutcome::Conflicted { server: current },
            };
            results.push(PushResult {
                mutation_id: mutation.id.clone(),
                outcome,
            });
        }
        Ok(PushResponse { results })
    }

    async fn pull(&self, cursor: &Cursor, limit: usize) -> SyncResult<PullResponse> {
        self.check_reachable()?;
        self.pulls.fetch_add(1, Ordering::SeqCst);

        if self.malformed.load(Ordering::SeqCst) {
            return Ok(PullResponse {
                snapshots: vec![EntitySnapshot::new("", "", json!({}), 1)],
                cursor: cursor.clone(),
                has_more: false,
            });
        }

        let since = cursor
            .sequence()
            .map_err(|e| SyncError::MalformedResponse(e.to_string()))?;

        let state = self.state.lock();
        let mut changes: Vec<&(EntitySnapshot, u64)> = state
            .entities
            .values()
            .filter(|(_, seq)| *seq > since)
            .collect();
        changes.sort_by_key(|(_, seq)| *seq);

        let has_more = changes.len() > limit;
        changes.truncate(limit);
        let next = changes
            .last()
            .map_or_else(|| cursor.clone(), |(_, seq)| Cursor::from_sequence(*seq));

        Ok(PullResponse {
            snapshots: changes.into_iter().map(|(s, _)| s.clone()).collect(),
            cursor: next,
            has_more,
        })
    }
}
