//! The mutation queue (outbox).
//!
//! Serializes every locally originated write in the order the user performed
//! it and keeps it until the remote store acknowledges it. Nothing leaves the
//! queue silently: a mutation is acknowledged, failed with a reason, or parked
//! as conflicted until someone discards or re-submits it.

use crate::error::{SyncError, SyncResult};
use crate::store::{LocalStore, WriteBatch, WriteOp};
use matchsync_engine::{
    chain_base_revision, plan_batch, rebase_successors, BackoffPolicy, Clock, ConflictRecord,
    EntitySnapshot, Mutation, MutationOp, MutationStatus,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Durable FIFO of pending writes.
pub struct MutationQueue {
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    backoff: BackoffPolicy,
    /// Highest sequence number handed out; also serializes every outbox
    /// read-modify-write (enqueue, batch selection, acknowledgment, failure,
    /// conflict, discard and resubmission).
    last_seq: Mutex<u64>,
}

impl MutationQueue {
    /// Open the queue over `store`, resuming sequence numbers after the
    /// newest persisted entry.
    pub fn new(
        store: Arc<dyn LocalStore>,
        clock: Arc<dyn Clock>,
        backoff: BackoffPolicy,
    ) -> SyncResult<Self> {
        let last_seq = store.scan_outbox()?.last().map_or(0, |m| m.seq);
        Ok(Self {
            store,
            clock,
            backoff,
            last_seq: Mutex::new(last_seq),
        })
    }

    /// Append a mutation durably with status `queued`.
    ///
    /// Re-enqueueing an id already in the outbox leaves the stored entry
    /// untouched and returns it.
    pub fn enqueue(&self, mutation: Mutation) -> SyncResult<Mutation> {
        let mut last_seq = self.last_seq.lock();
        self.append(&mut last_seq, mutation)
    }

    /// Append an update or delete based on the newest revision this device
    /// knows of for its entity: the base of the newest unacknowledged
    /// mutation in the chain, else the cached snapshot's revision.
    ///
    /// The base is read under the queue lock, so an acknowledgment landing
    /// concurrently either happens first or re-bases the new entry.
    pub fn enqueue_on_latest(&self, mut mutation: Mutation) -> SyncResult<Mutation> {
        let mut last_seq = self.last_seq.lock();
        mutation.base_revision = match mutation.op {
            MutationOp::Create => None,
            MutationOp::Update | MutationOp::Delete => {
                let local = self.store.get(&mutation.key())?.map(|s| s.revision);
                chain_base_revision(
                    &self.store.scan_outbox()?,
                    &mutation.entity_type,
                    &mutation.entity_id,
                    local,
                )
            }
        };
        self.append(&mut last_seq, mutation)
    }

    fn append(&self, last_seq: &mut u64, mut mutation: Mutation) -> SyncResult<Mutation> {
        if let Some(existing) = self.store.get_mutation(&mutation.id)? {
            return Ok(existing);
        }

        mutation.seq = *last_seq + 1;
        mutation.status = MutationStatus::Queued;
        mutation.attempts = 0;
        mutation.next_attempt_at = 0;
        mutation.last_error = None;
        self.store.append_mutation(mutation.clone())?;
        *last_seq = mutation.seq;

        tracing::debug!(
            mutation_id = %mutation.id,
            entity = %mutation.key(),
            seq = mutation.seq,
            base_revision = ?mutation.base_revision,
            op = %mutation.op,
            "mutation enqueued"
        );
        Ok(mutation)
    }

    /// Highest sequence number assigned so far.
    pub fn max_sequence(&self) -> u64 {
        *self.last_seq.lock()
    }

    /// Take the oldest eligible mutations, at most one per entity, and mark
    /// them `in-flight`. Only mutations with `seq <= ceiling` are taken.
    pub fn next_batch(&self, max_size: usize, ceiling: u64) -> SyncResult<Vec<Mutation>> {
        let _guard = self.last_seq.lock();
        let outbox = self.store.scan_outbox()?;
        let now = self.clock.now_millis();

        let batch: Vec<Mutation> = plan_batch(&outbox, max_size, now, ceiling)
            .into_iter()
            .map(|m| {
                let mut m = m.clone();
                m.status = MutationStatus::InFlight;
                m
            })
            .collect();

        if !batch.is_empty() {
            let mut writes = WriteBatch::new();
            writes.extend(batch.iter().cloned().map(WriteOp::UpdateMutation));
            self.store.commit(writes)?;
        }
        Ok(batch)
    }

    /// Remove a mutation permanently. Unknown ids are a no-op.
    pub fn acknowledge(&self, mutation_id: &str) -> SyncResult<()> {
        let _guard = self.last_seq.lock();
        self.store.remove_mutation(mutation_id)
    }

    /// Acknowledge `mutation` together with the writes its acknowledgment
    /// produced, re-basing queued successors onto `snapshot`'s revision, all
    /// in one transaction.
    pub fn acknowledge_applied(
        &self,
        mutation: &Mutation,
        snapshot: &EntitySnapshot,
        writes: WriteBatch,
    ) -> SyncResult<()> {
        let _guard = self.last_seq.lock();
        let outbox = self.store.scan_outbox()?;
        let rebased = rebase_successors(&outbox, mutation, snapshot.revision);

        let mut batch = WriteBatch::new().with(WriteOp::RemoveMutation(mutation.id.clone()));
        batch.extend(writes.into_ops());
        batch.extend(rebased.into_iter().map(WriteOp::UpdateMutation));
        self.store.commit(batch)?;

        tracing::debug!(
            mutation_id = %mutation.id,
            revision = snapshot.revision,
            "mutation acknowledged"
        );
        Ok(())
    }

    /// Record a failed push.
    ///
    /// A retryable failure returns the mutation to `queued` with one more
    /// attempt and a backoff delay; otherwise it becomes terminally `failed`.
    /// Returns the updated entry, or `None` if it is no longer queued.
    pub fn mark_failed(
        &self,
        mutation_id: &str,
        retryable: bool,
        reason: impl Into<String>,
    ) -> SyncResult<Option<Mutation>> {
        let _guard = self.last_seq.lock();
        let Some(mut mutation) = self.store.get_mutation(mutation_id)? else {
            return Ok(None);
        };

        mutation.last_error = Some(reason.into());
        if retryable {
            mutation.attempts = mutation.attempts.saturating_add(1);
            mutation.status = MutationStatus::Queued;
            mutation.next_attempt_at = self
                .backoff
                .next_attempt_at(self.clock.now_millis(), mutation.attempts);
        } else {
            mutation.status = MutationStatus::Failed;
        }

        self.store
            .commit(WriteBatch::new().with(WriteOp::UpdateMutation(mutation.clone())))?;
        Ok(Some(mutation))
    }

    /// Park a mutation as `conflicted` and persist its conflict record in the
    /// same transaction. Returns `false` if the mutation is gone.
    pub fn mark_conflicted(&self, record: &ConflictRecord) -> SyncResult<bool> {
        let _guard = self.last_seq.lock();
        let Some(mut mutation) = self.store.get_mutation(&record.mutation_id)? else {
            return Ok(false);
        };
        mutation.status = MutationStatus::Conflicted;
        let conflict = SyncError::RevisionConflict {
            mutation_id: record.mutation_id.clone(),
            entity: mutation.key(),
        };
        mutation.last_error = Some(conflict.to_string());

        self.store.commit(
            WriteBatch::new()
                .with(WriteOp::UpdateMutation(mutation))
                .with(WriteOp::PutConflict(record.clone())),
        )?;
        Ok(true)
    }

    /// Drop a mutation and any conflict recorded for it.
    pub fn discard(&self, mutation_id: &str) -> SyncResult<bool> {
        let _guard = self.last_seq.lock();
        let existed = self.store.get_mutation(mutation_id)?.is_some();
        self.store.commit(
            WriteBatch::new()
                .with(WriteOp::RemoveMutation(mutation_id.to_string()))
                .with(WriteOp::RemoveConflict(mutation_id.to_string())),
        )?;
        if existed {
            tracing::info!(mutation_id = %mutation_id, "mutation discarded");
        }
        Ok(existed)
    }

    /// Queue a parked mutation again, optionally with a corrected payload.
    ///
    /// A conflicted mutation is re-based onto the remote revision recorded in
    /// its conflict, which is removed. Attempts are reset.
    pub fn resubmit(
        &self,
        mutation_id: &str,
        payload: Option<serde_json::Value>,
    ) -> SyncResult<Option<Mutation>> {
        let _guard = self.last_seq.lock();
        let Some(original) = self.store.get_mutation(mutation_id)? else {
            return Ok(None);
        };
        if !matches!(
            original.status,
            MutationStatus::Failed | MutationStatus::Conflicted
        ) {
            return Err(SyncError::Engine(matchsync_engine::Error::InvalidStatus(
                format!("cannot resubmit a {} mutation", original.status),
            )));
        }

        let mut resubmitted = original.clone();
        if original.status == MutationStatus::Conflicted {
            let record = self
                .store
                .conflicts()?
                .into_iter()
                .find(|c| c.mutation_id == mutation_id);
            if let Some(record) = record {
                resubmitted.base_revision = record.remote_revision;
            }
        }
        if let Some(payload) = payload {
            resubmitted.payload = payload;
        }
        resubmitted.status = MutationStatus::Queued;
        resubmitted.attempts = 0;
        resubmitted.next_attempt_at = 0;
        resubmitted.last_error = None;

        let mut batch = WriteBatch::new()
            .with(WriteOp::UpdateMutation(resubmitted.clone()))
            .with(WriteOp::RemoveConflict(mutation_id.to_string()));
        if let Some(base) = resubmitted.base_revision {
            if resubmitted.base_revision != original.base_revision {
                let outbox = self.store.scan_outbox()?;
                batch.extend(
                    rebase_successors(&outbox, &original, base)
                        .into_iter()
                        .map(WriteOp::UpdateMutation),
                );
            }
        }
        self.store.commit(batch)?;

        tracing::info!(
            mutation_id = %mutation_id,
            base_revision = ?resubmitted.base_revision,
            "mutation resubmitted"
        );
        Ok(Some(resubmitted))
    }

    /// Return every `in-flight` mutation to `queued` without penalty.
    ///
    /// Used when a session aborts or after a crash: the remote store replays
    /// acknowledged ids idempotently, so pushing them again is safe.
    pub fn release_in_flight(&self) -> SyncResult<usize> {
        let _guard = self.last_seq.lock();
        let released: Vec<Mutation> = self
            .store
            .scan_outbox()?
            .into_iter()
            .filter(|m| m.status == MutationStatus::InFlight)
            .map(|mut m| {
                m.status = MutationStatus::Queued;
                m
            })
            .collect();

        let count = released.len();
        if count > 0 {
            let mut batch = WriteBatch::new();
            batch.extend(released.into_iter().map(WriteOp::UpdateMutation));
            self.store.commit(batch)?;
            tracing::debug!(count, "released in-flight mutations");
        }
        Ok(count)
    }

    /// Every outbox entry, oldest first.
    pub fn all(&self) -> SyncResult<Vec<Mutation>> {
        self.store.scan_outbox()
    }

    /// Entries still heading to the remote store.
    pub fn pending(&self) -> SyncResult<Vec<Mutation>> {
        self.with_status(|s| s.is_pending())
    }

    pub fn failed(&self) -> SyncResult<Vec<Mutation>> {
        self.with_status(|s| s == MutationStatus::Failed)
    }

    pub fn conflicted(&self) -> SyncResult<Vec<Mutation>> {
        self.with_status(|s| s == MutationStatus::Conflicted)
    }

    fn with_status(&self, keep: impl Fn(MutationStatus) -> bool) -> SyncResult<Vec<Mutation>> {
        Ok(self
            .store
            .scan_outbox()?
            .into_iter()
            .filter(|m| keep(m.status))
            .collect())
    }
}
