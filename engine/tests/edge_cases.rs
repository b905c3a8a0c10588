//! Edge case tests for matchsync-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use matchsync_engine::{
    chain_base_revision, decide, plan_batch, rebase_successors, submission_id, BackoffPolicy,
    ConfirmationEvent, ConfirmationStatus, ConflictRecord, Cursor, Decision, EntitySnapshot,
    MatchConfirmation, MatchRecord, Mutation, MutationOp, MutationOutcome, MutationStatus,
    PullResponse, PushMutation, PushResponse, PushResult, Score, ScoreSubmission, ScoreTolerance,
    MATCH_ENTITY, SCORE_SUBMISSION_ENTITY,
};
use serde_json::json;
use std::time::Duration;

fn update(id: &str, seq: u64, entity: &str, base: Option<u64>) -> Mutation {
    let mut m = Mutation::new(id, MATCH_ENTITY, entity, MutationOp::Update, json!({"n": seq}), base, 1000);
    m.seq = seq;
    m
}

// ============================================================================
// String Edge Cases
// ============================================================================

#[test]
fn unicode_entity_ids() {
    let ids = ["日本語テスト", "Привет мир", "🎉🚀💯", "with/slash", "with:colon"];

    for id in ids {
        let m = Mutation::new("op", MATCH_ENTITY, id, MutationOp::Create, json!({"name": id}), None, 0);
        let Decision::Apply(snapshot) = decide(None, &PushMutation::from(&m)) else {
            panic!("create of {id} should apply");
        };
        assert_eq!(snapshot.entity_id, id);
        assert_eq!(snapshot.payload["name"], id);
    }
}

#[test]
fn empty_identity_is_rejected() {
    let m = Mutation::new("op", MATCH_ENTITY, "", MutationOp::Create, json!({}), None, 0);
    assert!(matches!(decide(None, &PushMutation::from(&m)), Decision::Reject(_)));

    let m = Mutation::new("op", "", "x", MutationOp::Create, json!({}), None, 0);
    assert!(matches!(decide(None, &PushMutation::from(&m)), Decision::Reject(_)));
}

#[test]
fn player_ids_containing_separator() {
    // The submission id is built by concatenation; it must still round-trip
    let payload = ScoreSubmission::payload("m:1", "p:1", &Score::new(1, 2, 3));
    let parsed = ScoreSubmission::parse(&submission_id("m:1", "p:1"), &payload, 1).unwrap();
    assert_eq!(parsed.match_id, "m:1");
    assert_eq!(parsed.player_id, "p:1");
}

// ============================================================================
// Payload Edge Cases
// ============================================================================

#[test]
fn empty_update_delta_still_bumps_revision() {
    let current = EntitySnapshot::new(MATCH_ENTITY, "x", json!({"a": 1}), 4);
    let m = update("op", 1, "x", Some(4));
    let mut push = PushMutation::from(&m);
    push.payload = json!({});

    let Decision::Apply(next) = decide(Some(&current), &push) else {
        panic!("empty delta should apply");
    };
    assert_eq!(next.revision, 5);
    assert_eq!(next.payload, json!({"a": 1}));
}

#[test]
fn nested_objects_are_replaced_not_merged() {
    let current = EntitySnapshot::new(MATCH_ENTITY, "x", json!({"meta": {"a": 1, "b": 2}}), 1);
    let mut m = PushMutation::from(&update("op", 1, "x", Some(1)));
    m.payload = json!({"meta": {"c": 3}});

    let Decision::Apply(next) = decide(Some(&current), &m) else {
        panic!("update should apply");
    };
    assert_eq!(next.payload, json!({"meta": {"c": 3}}));
}

#[test]
fn deeply_nested_payload() {
    let mut nested = json!({"leaf": true});
    for _ in 0..64 {
        nested = json!({"inner": nested});
    }
    let m = Mutation::new("op", MATCH_ENTITY, "x", MutationOp::Create, nested.clone(), None, 0);
    let Decision::Apply(snapshot) = decide(None, &PushMutation::from(&m)) else {
        panic!("create should apply");
    };
    assert_eq!(snapshot.payload, nested);
}

#[test]
fn score_with_missing_component_is_rejected() {
    let payload = json!({"matchId": "m", "playerId": "p", "objectivePoints": 1, "victoryPoints": 2});
    let m = Mutation::new("op", SCORE_SUBMISSION_ENTITY, "m:p", MutationOp::Create, payload, None, 0);
    assert!(matches!(decide(None, &PushMutation::from(&m)), Decision::Reject(_)));
}

#[test]
fn score_update_is_validated_after_merge() {
    let current = EntitySnapshot::new(
        SCORE_SUBMISSION_ENTITY,
        "m:p",
        ScoreSubmission::payload("m", "p", &Score::new(1, 2, 3)),
        1,
    );
    let base = Mutation::new("op", SCORE_SUBMISSION_ENTITY, "m:p", MutationOp::Update, json!({}), Some(1), 0);

    let mut fine = PushMutation::from(&base);
    fine.payload = json!({"armyPoints": 10});
    assert!(matches!(decide(Some(&current), &fine), Decision::Apply(_)));

    let mut broken = PushMutation::from(&base);
    broken.payload = json!({"armyPoints": null});
    assert!(matches!(decide(Some(&current), &broken), Decision::Reject(_)));
}

// ============================================================================
// Revision Edge Cases
// ============================================================================

#[test]
fn exhausted_revision_is_rejected() {
    let current = EntitySnapshot::new(MATCH_ENTITY, "x", json!({}), u64::MAX);
    let m = PushMutation::from(&update("op", 1, "x", Some(u64::MAX)));
    assert!(matches!(decide(Some(&current), &m), Decision::Reject(_)));
}

#[test]
fn delete_of_tombstone_is_rejected() {
    let mut current = EntitySnapshot::new(MATCH_ENTITY, "x", json!({}), 2);
    current.deleted = true;
    let mut m = update("op", 1, "x", Some(2));
    m.op = MutationOp::Delete;
    assert!(matches!(decide(Some(&current), &PushMutation::from(&m)), Decision::Reject(_)));
}

#[test]
fn conflict_record_for_tombstone() {
    let mut server = EntitySnapshot::new(MATCH_ENTITY, "x", json!({"a": 1}), 9);
    server.deleted = true;
    let record = ConflictRecord::detect(&update("op", 1, "x", Some(3)), Some(&server), 10);
    assert!(record.remote_deleted);
    assert!(record.remote_snapshot().unwrap().deleted);
}

// ============================================================================
// Outbox Edge Cases
// ============================================================================

#[test]
fn empty_outbox() {
    assert!(plan_batch(&[], 10, 0, u64::MAX).is_empty());
}

#[test]
fn zero_batch_size() {
    let outbox = vec![update("a", 1, "x", Some(1))];
    assert!(plan_batch(&outbox, 0, 0, u64::MAX).is_empty());
}

#[test]
fn unsorted_outbox_is_planned_by_sequence() {
    let outbox = vec![
        update("a3", 3, "x", Some(1)),
        update("a1", 1, "x", Some(1)),
        update("a2", 2, "x", Some(1)),
    ];
    let batch = plan_batch(&outbox, 10, 0, u64::MAX);
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, "a1");
}

#[test]
fn acknowledged_entries_are_ignored() {
    let mut done = update("a1", 1, "x", Some(1));
    done.status = MutationStatus::Acknowledged;
    let outbox = vec![done, update("a2", 2, "x", Some(2))];

    let batch = plan_batch(&outbox, 10, 0, u64::MAX);
    assert_eq!(batch[0].id, "a2");
    assert_eq!(chain_base_revision(&outbox, MATCH_ENTITY, "x", Some(7)), Some(2));
}

#[test]
fn rebase_skips_in_flight_and_parked() {
    let head = update("a1", 1, "x", Some(1));
    let mut parked = update("a2", 2, "x", Some(1));
    parked.status = MutationStatus::Conflicted;
    let outbox = vec![head.clone(), parked, update("a3", 3, "x", Some(1))];

    let rebased = rebase_successors(&outbox, &head, 2);
    assert_eq!(rebased.len(), 1);
    assert_eq!(rebased[0].id, "a3");
}

#[test]
fn backoff_with_huge_attempt_count() {
    let policy = BackoffPolicy::new(Duration::from_millis(1), Duration::from_secs(60));
    assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(60));
    assert_eq!(policy.delay_for(33), Duration::from_secs(60));
}

#[test]
fn backoff_cap_below_base() {
    let policy = BackoffPolicy::new(Duration::from_secs(10), Duration::from_secs(1));
    assert_eq!(policy.delay_for(1), Duration::from_secs(1));
}

// ============================================================================
// Confirmation Edge Cases
// ============================================================================

#[test]
fn match_without_players_accepts_first_two() {
    let tolerance = ScoreTolerance::exact();
    let mut confirmation = MatchConfirmation::new("m");
    let record = MatchRecord {
        match_id: "m".into(),
        player_one: Some("alice".into()),
        ..Default::default()
    };
    confirmation.observe_match(&record, 1, &tolerance).unwrap();
    assert!(confirmation.players.is_none());

    for player in ["x", "y"] {
        let submission = ScoreSubmission {
            match_id: "m".into(),
            player_id: player.into(),
            score: Score::default(),
            revision: 1,
        };
        confirmation
            .apply(ConfirmationEvent::ScoreSynced(submission), &tolerance)
            .unwrap();
    }
    assert_eq!(confirmation.status, ConfirmationStatus::Confirmed);
}

#[test]
fn zero_scores_agree() {
    assert!(ScoreTolerance::exact().agrees(&Score::default(), &Score::default()));
}

#[test]
fn extreme_scores_do_not_overflow_tolerance() {
    let tolerance = ScoreTolerance::new(u64::MAX, u64::MAX, u64::MAX);
    assert!(tolerance.agrees(&Score::new(0, 0, 0), &Score::new(i64::MAX, i64::MAX, i64::MAX)));
}

#[test]
fn confirmation_state_survives_serialization() {
    let tolerance = ScoreTolerance::exact();
    let mut confirmation = MatchConfirmation::new("m");
    confirmation
        .apply(
            ConfirmationEvent::ScoreSynced(ScoreSubmission {
                match_id: "m".into(),
                player_id: "alice".into(),
                score: Score::new(7, 150, 300),
                revision: 2,
            }),
            &tolerance,
        )
        .unwrap();

    let json = serde_json::to_string(&confirmation).unwrap();
    let restored: MatchConfirmation = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, confirmation);
    assert_eq!(restored.status, ConfirmationStatus::Partial);
}

// ============================================================================
// Protocol Edge Cases
// ============================================================================

#[test]
fn push_response_with_all_outcomes() {
    let response = PushResponse {
        results: vec![
            PushResult {
                mutation_id: "a".into(),
                outcome: MutationOutcome::Acknowledged {
                    snapshot: EntitySnapshot::new(MATCH_ENTITY, "x", json!({}), 1),
                },
            },
            PushResult {
                mutation_id: "b".into(),
                outcome: MutationOutcome::Rejected {
                    reason: "no".into(),
                },
            },
            PushResult {
                mutation_id: "c".into(),
                outcome: MutationOutcome::Conflicted { server: None },
            },
        ],
    };
    let json = serde_json::to_string(&response).unwrap();
    let parsed: PushResponse = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, response);
}

#[test]
fn empty_pull_keeps_cursor() {
    let parsed: PullResponse =
        serde_json::from_str(r#"{"snapshots":[],"cursor":"17","hasMore":false}"#).unwrap();
    assert!(parsed.snapshots.is_empty());
    assert_eq!(parsed.cursor.sequence().unwrap(), 17);
}

#[test]
fn negative_cursor_is_invalid() {
    assert!(Cursor::new("-1").sequence().is_err());
    assert!(Cursor::new(" 1").sequence().is_err());
}
