//! Durable local storage.
//!
//! A [`LocalStore`] holds the cached entity snapshots, the mutation outbox,
//! parked conflicts, match confirmation state and the pull cursor. It has no
//! business logic.
//!
//! All writes go through [`LocalStore::commit`]: a [`WriteBatch`] is one
//! scoped transaction, so the writes belonging to one synchronization outcome
//! (say, removing an acknowledged mutation and storing the snapshot it
//! produced) are applied together or not at all.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::SyncResult;
use matchsync_engine::{
    ConflictRecord, Cursor, EntityKey, EntitySnapshot, MatchConfirmation, Mutation, MutationId,
    MutationStatus,
};

/// A single write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert or overwrite a snapshot
    PutSnapshot(EntitySnapshot),
    /// Remove a snapshot
    DeleteSnapshot(EntityKey),
    /// Append a mutation to the outbox; a duplicate id is ignored
    AppendMutation(Mutation),
    /// Overwrite an existing outbox entry
    UpdateMutation(Mutation),
    /// Remove an outbox entry; removing a missing id is a no-op
    RemoveMutation(MutationId),
    /// Record a conflict, keyed by mutation id
    PutConflict(ConflictRecord),
    /// Drop the conflict recorded for a mutation
    RemoveConflict(MutationId),
    /// Store a match's confirmation state
    PutConfirmation(MatchConfirmation),
    /// Persist the pull cursor
    SetCursor(Cursor),
}

/// An atomic group of writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn with(mut self, op: WriteOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn extend(&mut self, ops: impl IntoIterator<Item = WriteOp>) -> &mut Self {
        self.ops.extend(ops);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Persistent storage for the sync engine.
///
/// Implementations must make a committed batch survive an abrupt process
/// termination without any further flush.
pub trait LocalStore: Send + Sync {
    /// Get a snapshot.
    fn get(&self, key: &EntityKey) -> SyncResult<Option<EntitySnapshot>>;

    /// All outbox entries ordered by sequence number.
    fn scan_outbox(&self) -> SyncResult<Vec<Mutation>>;

    /// One outbox entry.
    fn get_mutation(&self, id: &str) -> SyncResult<Option<Mutation>>;

    /// All parked conflicts, oldest first.
    fn conflicts(&self) -> SyncResult<Vec<ConflictRecord>>;

    /// Confirmation state of a match.
    fn confirmation(&self, match_id: &str) -> SyncResult<Option<MatchConfirmation>>;

    /// Last persisted pull cursor.
    fn cursor(&self) -> SyncResult<Cursor>;

    /// Apply every write of the batch atomically.
    fn commit(&self, batch: WriteBatch) -> SyncResult<()>;

    /// Insert or overwrite a snapshot.
    fn put(&self, snapshot: EntitySnapshot) -> SyncResult<()> {
        self.commit(WriteBatch::new().with(WriteOp::PutSnapshot(snapshot)))
    }

    /// Remove a snapshot.
    fn delete(&self, key: &EntityKey) -> SyncResult<()> {
        self.commit(WriteBatch::new().with(WriteOp::DeleteSnapshot(key.clone())))
    }

    /// Append a mutation to the outbox.
    fn append_mutation(&self, mutation: Mutation) -> SyncResult<()> {
        self.commit(WriteBatch::new().with(WriteOp::AppendMutation(mutation)))
    }

    /// Remove a mutation from the outbox.
    fn remove_mutation(&self, id: &str) -> SyncResult<()> {
        self.commit(WriteBatch::new().with(WriteOp::RemoveMutation(id.to_string())))
    }

    /// Change the status of an outbox entry. Missing ids are a no-op.
    fn update_mutation_status(&self, id: &str, status: MutationStatus) -> SyncResult<()> {
        match self.get_mutation(id)? {
            Some(mut mutation) => {
                mutation.status = status;
                self.commit(WriteBatch::new().with(WriteOp::UpdateMutation(mutation)))
            }
            None => Ok(()),
        }
    }
}
