//! Performance benchmarks for matchsync-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use matchsync_engine::{
    decide, plan_batch, rebase_successors, submission_id, ConfirmationEvent, EntitySnapshot,
    MatchConfirmation, MatchRecord, Mutation, MutationOp, PushMutation, Score, ScoreSubmission,
    ScoreTolerance, SCORE_SUBMISSION_ENTITY,
};
use serde_json::json;

fn outbox_of(size: u64, entities: u64) -> Vec<Mutation> {
    (0..size)
        .map(|i| {
            let mut m = Mutation::new(
                format!("mut_{}", i),
                "match",
                format!("match_{}", i % entities),
                MutationOp::Update,
                json!({"round": i}),
                Some(1),
                1000,
            );
            m.seq = i + 1;
            m
        })
        .collect()
}

fn bench_outbox(c: &mut Criterion) {
    let mut group = c.benchmark_group("outbox");

    for size in [100u64, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("plan_batch", size), &size, |b, &size| {
            let outbox = outbox_of(size, size / 4);
            b.iter(|| plan_batch(black_box(&outbox), black_box(50), 1000, u64::MAX).len())
        });
    }

    group.bench_function("rebase_successors_1000", |b| {
        let outbox = outbox_of(1_000, 10);
        let head = outbox[0].clone();
        b.iter(|| rebase_successors(black_box(&outbox), black_box(&head), 2))
    });

    group.finish();
}

fn bench_revisions(c: &mut Criterion) {
    let mut group = c.benchmark_group("revisions");

    group.bench_function("decide_update", |b| {
        let current = EntitySnapshot::new(
            "match",
            "match_1",
            json!({"playerOne": "alice", "playerTwo": "bob", "round": 1, "table": 4}),
            7,
        );
        let m = Mutation::new(
            "mut_1",
            "match",
            "match_1",
            MutationOp::Update,
            json!({"round": 2, "table": null}),
            Some(7),
            1000,
        );
        let push = PushMutation::from(&m);
        b.iter(|| decide(black_box(Some(&current)), black_box(&push)))
    });

    group.bench_function("decide_score_submission", |b| {
        let score = Score::new(7, 150, 300);
        let m = Mutation::new(
            "mut_1",
            SCORE_SUBMISSION_ENTITY,
            submission_id("match_1", "alice"),
            MutationOp::Create,
            ScoreSubmission::payload("match_1", "alice", &score),
            None,
            1000,
        )
        .with_author("alice");
        let push = PushMutation::from(&m);
        b.iter(|| decide(black_box(None), black_box(&push)))
    });

    group.finish();
}

fn bench_confirmation(c: &mut Criterion) {
    let mut group = c.benchmark_group("confirmation");
    let tolerance = ScoreTolerance::exact();

    group.bench_function("confirm_match", |b| {
        let record = MatchRecord {
            match_id: "match_1".into(),
            player_one: Some("alice".into()),
            player_two: Some("bob".into()),
            ..Default::default()
        };

        b.iter(|| {
            let mut confirmation = MatchConfirmation::new("match_1");
            let _ = confirmation.observe_match(&record, 1, &tolerance);
            for player in ["alice", "bob"] {
                let submission = ScoreSubmission {
                    match_id: "match_1".into(),
                    player_id: player.into(),
                    score: Score::new(7, 150, 300),
                    revision: 1,
                };
                let _ = confirmation.apply(
                    black_box(ConfirmationEvent::ScoreSynced(submission)),
                    &tolerance,
                );
            }
            confirmation.status
        })
    });

    group.bench_function("parse_submission", |b| {
        let snapshot = EntitySnapshot::new(
            SCORE_SUBMISSION_ENTITY,
            submission_id("match_1", "alice"),
            ScoreSubmission::payload("match_1", "alice", &Score::new(7, 150, 300)),
            3,
        );
        b.iter(|| ScoreSubmission::from_snapshot(black_box(&snapshot)))
    });

    group.finish();
}

fn bench_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialization");

    group.bench_function("mutation_to_json", |b| {
        let m = Mutation::new(
            "mut_1",
            "match",
            "match_1",
            MutationOp::Update,
            json!({"round": 2, "table": 4}),
            Some(3),
            1000,
        );
        b.iter(|| serde_json::to_string(black_box(&m)))
    });

    group.bench_function("snapshot_from_json", |b| {
        let json = r#"{"entityType":"match","entityId":"match_1","payload":{"playerOne":"alice","playerTwo":"bob"},"revision":3,"deleted":false,"lastSyncedAt":1000}"#;
        b.iter(|| serde_json::from_str::<EntitySnapshot>(black_box(json)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_outbox,
    bench_revisions,
    bench_confirmation,
    bench_serialization,
);
criterion_main!(benches);
