//! The remote reconciler: the only component that talks to the network.
//!
//! It wraps a [`RemoteTransport`] and checks that what comes back obeys the
//! protocol before anyone acts on it. It never touches the local store.

use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteTransport;
use matchsync_engine::{
    Cursor, Mutation, MutationOutcome, PullResponse, PushMutation, PushRequest,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Pushes mutations and pulls snapshots, validating every response.
pub struct RemoteReconciler {
    transport: Arc<dyn RemoteTransport>,
    client_id: String,
}

impl RemoteReconciler {
    pub fn new(transport: Arc<dyn RemoteTransport>, client_id: impl Into<String>) -> Self {
        Self {
            transport,
            client_id: client_id.into(),
        }
    }

    /// Push a batch. Returns each mutation paired with its outcome, in batch
    /// order.
    pub async fn push(&self, batch: &[Mutation]) -> SyncResult<Vec<(Mutation, MutationOutcome)>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let request = PushRequest {
            client_id: self.client_id.clone(),
            mutations: batch.iter().map(PushMutation::from).collect(),
        };
        let response = self.transport.push(&request).await?;

        let mut outcomes: HashMap<String, MutationOutcome> = HashMap::new();
        for result in response.results {
            if outcomes.insert(result.mutation_id.clone(), result.outcome).is_some() {
                return Err(malformed(format!(
                    "duplicate outcome for mutation {}",
                    result.mutation_id
                )));
            }
        }
        if outcomes.len() != batch.len() {
            return Err(malformed(format!(
                "expected {} outcomes, got {}",
                batch.len(),
                outcomes.len()
            )));
        }

        let mut paired = Vec::with_capacity(batch.len());
        for mutation in batch {
            let outcome = outcomes
                .remove(&mutation.id)
                .ok_or_else(|| malformed(format!("no outcome for mutation {}", mutation.id)))?;
            if let MutationOutcome::Acknowledged { snapshot } = &outcome {
                if !snapshot_targets(mutation, snapshot) {
                    return Err(malformed(format!(
                        "acknowledgment of {} carries {}",
                        mutation.id,
                        snapshot.key()
                    )));
                }
            }
            paired.push((mutation.clone(), outcome));
        }

        tracing::debug!(count = paired.len(), "push completed");
        Ok(paired)
    }

    /// Pull changes after `cursor`.
    pub async fn pull(&self, cursor: &Cursor, limit: usize) -> SyncResult<PullResponse> {
        let response = self.transport.pull(cursor, limit).await?;
        if let Some(bad) = response.snapshots.iter().find(|s| !s.key().is_valid()) {
            return Err(malformed(format!(
                "pulled snapshot without identity ({})",
                bad.key()
            )));
        }
        if response.snapshots.len() > limit {
            return Err(malformed(format!(
                "asked for {limit} snapshots, got {}",
                response.snapshots.len()
            )));
        }
        Ok(response)
    }
}

fn snapshot_targets(mutation: &Mutation, snapshot: &matchsync_engine::EntitySnapshot) -> bool {
    mutation.targets(&snapshot.entity_type, &snapshot.entity_id)
}

fn malformed(message: String) -> SyncError {
    tracing::error!(error = %message, "malformed server response");
    SyncError::MalformedResponse(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryRemote;
    use async_trait::async_trait;
    use matchsync_engine::{EntitySnapshot, MutationOp, PushResponse, PushResult};
    use serde_json::json;

    /// Acknowledges every mutation with a snapshot of the wrong entity.
    struct Misdirected;

    #[async_trait]
    impl RemoteTransport for Misdirected {
        async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
            Ok(PushResponse {
                results: request
                    .mutations
                    .iter()
                    .map(|m| PushResult {
                        mutation_id: m.id.clone(),
                        outcome: MutationOutcome::Acknowledged {
                            snapshot: EntitySnapshot::new("match", "elsewhere", json!({}), 1),
                        },
                    })
                    .collect(),
            })
        }

        async fn pull(&self, cursor: &Cursor, _limit: usize) -> SyncResult<PullResponse> {
            Ok(PullResponse {
                snapshots: Vec::new(),
                cursor: cursor.clone(),
                has_more: false,
            })
        }
    }

    fn create(id: &str, entity: &str) -> Mutation {
        Mutation::new(id, "match", entity, MutationOp::Create, json!({}), None, 0)
    }

    #[tokio::test]
    async fn pairs_outcomes_in_batch_order() {
        let reconciler = RemoteReconciler::new(Arc::new(InMemoryRemote::new()), "device");
        let batch = vec![create("b", "y"), create("a", "x")];
        let paired = reconciler.push(&batch).await.unwrap();
        assert_eq!(paired[0].0.id, "b");
        assert_eq!(paired[1].0.id, "a");
        assert!(paired.iter().all(|(_, o)| o.is_acknowledged()));
    }

    #[tokio::test]
    async fn missing_outcomes_are_malformed() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.set_malformed(true);
        let reconciler = RemoteReconciler::new(remote, "device");
        let err = reconciler.push(&[create("a", "x")]).await.unwrap_err();
        assert!(matches!(err, SyncError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn misdirected_acknowledgment_is_malformed() {
        let reconciler = RemoteReconciler::new(Arc::new(Misdirected), "device");
        let err = reconciler.push(&[create("a", "x")]).await.unwrap_err();
        assert!(matches!(err, SyncError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn anonymous_snapshots_are_malformed() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.set_malformed(true);
        let reconciler = RemoteReconciler::new(remote, "device");
        let err = reconciler.pull(&Cursor::beginning(), 10).await.unwrap_err();
        assert!(matches!(err, SyncError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn empty_batch_skips_network() {
        let remote = Arc::new(InMemoryRemote::new());
        let reconciler = RemoteReconciler::new(remote.clone(), "device");
        assert!(reconciler.push(&[]).await.unwrap().is_empty());
        assert_eq!(remote.push_count(), 0);
    }
}
