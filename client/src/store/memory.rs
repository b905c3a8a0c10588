//! In-memory store for tests and ephemeral sessions.

use super::{LocalStore, WriteBatch, WriteOp};
use crate::error::{SyncError, SyncResult};
use matchsync_engine::{
    ConflictRecord, Cursor, EntityId, EntityKey, EntitySnapshot, MatchConfirmation, Mutation,
    MutationId,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
struct State {
    snapshots: BTreeMap<EntityKey, EntitySnapshot>,
    outbox: BTreeMap<MutationId, Mutation>,
    conflicts: BTreeMap<MutationId, ConflictRecord>,
    confirmations: BTreeMap<EntityId, MatchConfirmation>,
    cursor: Cursor,
}

impl State {
    fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::PutSnapshot(snapshot) => {
                self.snapshots.insert(snapshot.key(), snapshot);
            }
            WriteOp::DeleteSnapshot(key) => {
                self.snapshots.remove(&key);
            }
            WriteOp::AppendMutation(mutation) => {
                self.outbox.entry(mutation.id.clone()).or_insert(mutation);
            }
            WriteOp::UpdateMutation(mutation) => {
                if let Some(existing) = self.outbox.get_mut(&mutation.id) {
                    *existing = mutation;
                }
            }
            WriteOp::RemoveMutation(id) => {
                self.outbox.remove(&id);
            }
            WriteOp::PutConflict(record) => {
                self.conflicts.insert(record.mutation_id.clone(), record);
            }
            WriteOp::RemoveConflict(id) => {
                self.conflicts.remove(&id);
            }
            WriteOp::PutConfirmation(confirmation) => {
                self.confirmations
                    .insert(confirmation.match_id.clone(), confirmation);
            }
            WriteOp::SetCursor(cursor) => self.cursor = cursor,
        }
    }
}

/// A [`LocalStore`] kept entirely in memory.
///
/// Applying an op cannot fail, so a batch applied under one write guard is
/// all-or-nothing and readers never see half of it. Nothing survives the
/// process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    corrupted: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail as if storage were corrupted.
    pub fn simulate_corruption(&self, corrupted: bool) {
        self.corrupted.store(corrupted, Ordering::SeqCst);
    }

    fn check(&self) -> SyncResult<()> {
        if self.corrupted.load(Ordering::SeqCst) {
            return Err(SyncError::StorageCorruption(
                "in-memory store marked corrupted".into(),
            ));
        }
        Ok(())
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &EntityKey) -> SyncResult<Option<EntitySnapshot>> {
        self.check()?;
        Ok(self.state.read().snapshots.get(key).cloned())
    }

    fn scan_outbox(&self) -> SyncResult<Vec<Mutation>> {
        self.check()?;
        let mut outbox: Vec<Mutation> = self.state.read().outbox.values().cloned().collect();
        outbox.sort_by_key(|m| m.seq);
        Ok(outbox)
    }

    fn get_mutation(&self, id: &str) -> SyncResult<Option<Mutation>> {
        self.check()?;
        Ok(self.state.read().outbox.get(id).cloned())
    }

    fn conflicts(&self) -> SyncResult<Vec<ConflictRecord>> {
        self.check()?;
        let mut conflicts: Vec<ConflictRecord> =
            self.state.read().conflicts.values().cloned().collect();
        conflicts.sort_by_key(|c| c.detected_at);
        Ok(conflicts)
    }

    fn confirmation(&self, match_id: &str) -> SyncResult<Option<MatchConfirmation>> {
        self.check()?;
        Ok(self.state.read().confirmations.get(match_id).cloned())
    }

    fn cursor(&self) -> SyncResult<Cursor> {
        self.check()?;
        Ok(self.state.read().cursor.clone())
    }

    fn commit(&self, batch: WriteBatch) -> SyncResult<()> {
        self.check()?;
        let mut state = self.state.write();
        for op in batch.into_ops() {
            state.apply(op);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchsync_engine::MutationOp;
    use serde_json::json;

    #[test]
    fn satisfies_store_contract() {
        super::super::tests::exercise_store(&MemoryStore::new());
    }

    #[test]
    fn batch_is_visible_as_a_whole() {
        let store = MemoryStore::new();
        let acked = Mutation::new("m1", "match", "x", MutationOp::Update, json!({}), Some(1), 0);
        store.append_mutation(acked).unwrap();

        store
            .commit(
                WriteBatch::new()
                    .with(WriteOp::RemoveMutation("m1".into()))
                    .with(WriteOp::PutSnapshot(EntitySnapshot::new(
                        "match",
                        "x",
                        json!({"n": 1}),
                        2,
                    )))
                    .with(WriteOp::SetCursor(Cursor::new("7"))),
            )
            .unwrap();

        assert!(store.get_mutation("m1").unwrap().is_none());
        assert_eq!(
            store.get(&EntityKey::new("match", "x")).unwrap().unwrap().revision,
            2
        );
        assert_eq!(store.cursor().unwrap(), Cursor::new("7"));
    }

    #[test]
    fn corruption_fails_everything() {
        let store = MemoryStore::new();
        store.simulate_corruption(true);
        assert!(matches!(
            store.get(&EntityKey::new("match", "x")),
            Err(SyncError::StorageCorruption(_))
        ));
        assert!(store
            .put(EntitySnapshot::new("match", "x", json!({}), 1))
            .is_err());

        store.simulate_corruption(false);
        assert!(store.get(&EntityKey::new("match", "x")).unwrap().is_none());
    }
}
