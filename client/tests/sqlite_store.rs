//! Durability of the SQLite store across process restarts.

use matchsync_client::{
    InMemoryRemote, LocalStore, SqliteStore, StaticIdentity, SyncConfig, SyncEngine, SyncError,
    WriteBatch, WriteOp,
};
use matchsync_engine::{
    ConfirmationStatus, EntityKey, EntitySnapshot, Mutation, MutationOp, MutationStatus, Score,
    MATCH_ENTITY,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use tempfile::tempdir;

fn engine(path: &std::path::Path, remote: &Arc<InMemoryRemote>) -> SyncEngine {
    SyncEngine::new(
        Arc::new(SqliteStore::open(path).unwrap()),
        remote.clone(),
        Arc::new(StaticIdentity::new("alice")),
        SyncConfig::new().with_client_id("alice-device"),
    )
    .unwrap()
}

#[tokio::test]
async fn outbox_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sync.db");
    let remote = Arc::new(InMemoryRemote::new());

    let first = engine(&path, &remote);
    let a = first
        .submit(MATCH_ENTITY, "m1", MutationOp::Create, json!({"table": 1}))
        .unwrap();
    let b = first
        .submit(MATCH_ENTITY, "m1", MutationOp::Update, json!({"table": 2}))
        .unwrap();
    drop(first);

    let second = engine(&path, &remote);
    let outbox = second.outbox().unwrap();
    assert_eq!(
        outbox.iter().map(|m| m.id.clone()).collect::<Vec<_>>(),
        vec![a.id, b.id]
    );

    // Sequence numbers continue after the persisted ones
    let c = second
        .submit(MATCH_ENTITY, "m2", MutationOp::Create, json!({}))
        .unwrap();
    assert_eq!(c.seq, 3);

    second.run_once().await.unwrap();
    assert!(second.outbox().unwrap().is_empty());
    assert_eq!(
        second
            .get_local(MATCH_ENTITY, "m1")
            .unwrap()
            .unwrap()
            .payload,
        json!({"table": 2})
    );
}

#[tokio::test]
async fn reconciled_state_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sync.db");
    let remote = Arc::new(InMemoryRemote::new());
    remote.write_as_other_client(
        MATCH_ENTITY,
        "m1",
        json!({"playerOne": "alice", "playerTwo": "bob"}),
    );

    let first = engine(&path, &remote);
    first.submit_score("m1", Score::new(7, 150, 300)).unwrap();
    let report = first.run_once().await.unwrap();
    drop(first);

    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(store.cursor().unwrap(), report.cursor);
    assert!(store.get(&EntityKey::new(MATCH_ENTITY, "m1")).unwrap().is_some());
    assert_eq!(
        store.confirmation("m1").unwrap().unwrap().status,
        ConfirmationStatus::Partial
    );
    drop(store);

    // Nothing is pulled twice after the restart
    let second = engine(&path, &remote);
    let report = second.run_once().await.unwrap();
    assert_eq!(report.pulled, 0);
}

#[tokio::test]
async fn in_flight_batch_is_recovered_after_crash() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sync.db");
    let remote = Arc::new(InMemoryRemote::new());

    let store = SqliteStore::open(&path).unwrap();
    let mut m = Mutation::new("m1", MATCH_ENTITY, "x", MutationOp::Create, json!({}), None, 0);
    m.seq = 1;
    m.status = MutationStatus::InFlight;
    store.append_mutation(m).unwrap();
    drop(store);

    let engine = engine(&path, &remote);
    engine.start().unwrap();
    for _ in 0..200 {
        if engine.outbox().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    engine.stop().await;
    assert!(engine.outbox().unwrap().is_empty());
    assert_eq!(remote.applied().len(), 1);
}

#[test]
fn failed_batch_leaves_no_partial_writes() {
    let dir = tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("sync.db")).unwrap();

    let mut m = Mutation::new("m1", MATCH_ENTITY, "x", MutationOp::Update, json!({}), Some(1), 0);
    m.seq = 1;
    store.append_mutation(m).unwrap();

    // A revision SQLite cannot represent fails the second write
    let unrepresentable = EntitySnapshot::new(MATCH_ENTITY, "x", json!({}), u64::MAX);
    let result = store.commit(
        WriteBatch::new()
            .with(WriteOp::RemoveMutation("m1".into()))
            .with(WriteOp::PutSnapshot(unrepresentable)),
    );

    assert!(matches!(result, Err(SyncError::StorageCorruption(_))));
    assert!(store.get_mutation("m1").unwrap().is_some());
    assert!(store.get(&EntityKey::new(MATCH_ENTITY, "x")).unwrap().is_none());
}

#[test]
fn garbage_file_is_storage_corruption() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sync.db");
    std::fs::write(&path, b"this is not a sqlite database, just some bytes padding it out").unwrap();

    assert!(matches!(
        SqliteStore::open(&path),
        Err(SyncError::StorageCorruption(_))
    ));
}
