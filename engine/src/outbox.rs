//! Outbox planning: which mutations go out next, and how successors follow
//! their predecessors.
//!
//! These are pure functions over a snapshot of the outbox. The client's
//! mutation queue persists the decisions they make.
//!
//! ## Per-entity ordering
//!
//! Mutations against the same entity form a chain ordered by `seq`. Only the
//! head of a chain (its oldest queued or in-flight mutation) may be pushed, so
//! a batch carries at most one mutation per entity and a successor is never
//! applied remotely before its predecessor. A head that is in flight or still
//! backing off blocks the whole chain.
//!
//! Parked mutations (`failed`, `conflicted`) do not block. A successor of a
//! conflicted mutation carries the same stale base revision, so the remote
//! store reports it as conflicted as well instead of applying it.

use crate::{Mutation, MutationStatus, Revision, Timestamp};
use std::collections::BTreeSet;

/// Select the next batch of mutations to push.
///
/// Only mutations with `seq <= ceiling` are considered; anything enqueued after
/// the ceiling was taken waits for the next batch. Returned in FIFO order.
pub fn plan_batch(
    outbox: &[Mutation],
    max_size: usize,
    now: Timestamp,
    ceiling: u64,
) -> Vec<&Mutation> {
    let mut ordered: Vec<&Mutation> = outbox.iter().collect();
    ordered.sort_by_key(|m| m.seq);

    let mut seen: BTreeSet<(&str, &str)> = BTreeSet::new();
    let mut batch = Vec::new();

    for mutation in ordered {
        if batch.len() >= max_size {
            break;
        }
        if mutation.seq > ceiling || !mutation.status.is_pending() {
            continue;
        }
        // First pending mutation of an entity is the chain head
        if !seen.insert((mutation.entity_type.as_str(), mutation.entity_id.as_str())) {
            continue;
        }
        if mutation.is_eligible(now) {
            batch.push(mutation);
        }
    }

    batch
}

/// Re-base the queued successors of `head` onto `new_revision`.
///
/// Successors authored on top of `head` share its base revision. Once `head`
/// has produced `new_revision` remotely, they are re-based so they do not
/// conflict with their own predecessor. Returns the updated copies.
pub fn rebase_successors(outbox: &[Mutation], head: &Mutation, new_revision: Revision) -> Vec<Mutation> {
    outbox
        .iter()
        .filter(|m| {
            m.id != head.id
                && m.seq > head.seq
                && m.status == MutationStatus::Queued
                && m.targets(&head.entity_type, &head.entity_id)
                && m.base_revision == head.base_revision
        })
        .map(|m| {
            let mut rebased = m.clone();
            rebased.base_revision = Some(new_revision);
            rebased
        })
        .collect()
}

/// Base revision for a new mutation against an entity.
///
/// A new mutation extends the entity's chain: it shares the base of the
/// newest unacknowledged mutation for the entity, or uses the locally known
/// snapshot revision when the chain is empty.
pub fn chain_base_revision(
    outbox: &[Mutation],
    entity_type: &str,
    entity_id: &str,
    snapshot_revision: Option<Revision>,
) -> Option<Revision> {
    outbox
        .iter()
        .filter(|m| m.targets(entity_type, entity_id) && m.status != MutationStatus::Acknowledged)
        .max_by_key(|m| m.seq)
        .map_or(snapshot_revision, |m| m.base_revision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MutationOp;
    use serde_json::json;

    fn mutation(id: &str, seq: u64, entity: &str, base: Option<Revision>) -> Mutation {
        let mut m = Mutation::new(id, "match", entity, MutationOp::Update, json!({}), base, 0);
        m.seq = seq;
        m
    }

    fn ids(batch: &[&Mutation]) -> Vec<String> {
        batch.iter().map(|m| m.id.clone()).collect()
    }

    #[test]
    fn fifo_across_entities() {
        let outbox = vec![
            mutation("c", 3, "z", Some(1)),
            mutation("a", 1, "x", Some(1)),
            mutation("b", 2, "y", Some(1)),
        ];
        let batch = plan_batch(&outbox, 10, 0, u64::MAX);
        assert_eq!(ids(&batch), vec!["a", "b", "c"]);
    }

    #[test]
    fn one_mutation_per_entity() {
        let outbox = vec![
            mutation("a1", 1, "x", Some(1)),
            mutation("a2", 2, "x", Some(1)),
            mutation("b1", 3, "y", Some(1)),
        ];
        let batch = plan_batch(&outbox, 10, 0, u64::MAX);
        assert_eq!(ids(&batch), vec!["a1", "b1"]);
    }

    #[test]
    fn respects_max_size() {
        let outbox: Vec<Mutation> = (1..=5)
            .map(|i| mutation(&format!("m{i}"), i, &format!("e{i}"), Some(1)))
            .collect();
        let batch = plan_batch(&outbox, 2, 0, u64::MAX);
        assert_eq!(ids(&batch), vec!["m1", "m2"]);
    }

    #[test]
    fn ceiling_excludes_newer_mutations() {
        let outbox = vec![mutation("a", 1, "x", Some(1)), mutation("b", 2, "y", Some(1))];
        let batch = plan_batch(&outbox, 10, 0, 1);
        assert_eq!(ids(&batch), vec!["a"]);
    }

    #[test]
    fn backing_off_head_blocks_successors() {
        let mut head = mutation("a1", 1, "x", Some(1));
        head.next_attempt_at = 10_000;
        let outbox = vec![head, mutation("a2", 2, "x", Some(1)), mutation("b", 3, "y", Some(1))];

        let batch = plan_batch(&outbox, 10, 5_000, u64::MAX);
        assert_eq!(ids(&batch), vec!["b"]);

        let batch = plan_batch(&outbox, 10, 10_000, u64::MAX);
        assert_eq!(ids(&batch), vec!["a1", "b"]);
    }

    #[test]
    fn in_flight_head_blocks_successors() {
        let mut head = mutation("a1", 1, "x", Some(1));
        head.status = MutationStatus::InFlight;
        let outbox = vec![head, mutation("a2", 2, "x", Some(1))];
        assert!(plan_batch(&outbox, 10, 0, u64::MAX).is_empty());
    }

    #[test]
    fn parked_mutations_do_not_block() {
        let mut head = mutation("a1", 1, "x", Some(1));
        head.status = MutationStatus::Conflicted;
        let mut failed = mutation("b1", 2, "y", Some(1));
        failed.status = MutationStatus::Failed;
        let outbox = vec![
            head,
            failed,
            mutation("a2", 3, "x", Some(1)),
            mutation("b2", 4, "y", Some(1)),
        ];
        let batch = plan_batch(&outbox, 10, 0, u64::MAX);
        assert_eq!(ids(&batch), vec!["a2", "b2"]);
    }

    #[test]
    fn rebase_moves_successors_sharing_the_base() {
        let head = mutation("a1", 1, "x", Some(3));
        let outbox = vec![
            head.clone(),
            mutation("a2", 2, "x", Some(3)),
            mutation("a3", 3, "x", Some(2)),
            mutation("b1", 4, "y", Some(3)),
        ];
        let rebased = rebase_successors(&outbox, &head, 4);
        assert_eq!(rebased.len(), 1);
        assert_eq!(rebased[0].id, "a2");
        assert_eq!(rebased[0].base_revision, Some(4));
    }

    #[test]
    fn rebase_after_create() {
        let mut head = mutation("c", 1, "x", None);
        head.op = MutationOp::Create;
        let outbox = vec![head.clone(), mutation("u", 2, "x", None)];
        let rebased = rebase_successors(&outbox, &head, 1);
        assert_eq!(rebased[0].base_revision, Some(1));
    }

    #[test]
    fn chain_base_prefers_pending_chain() {
        let outbox = vec![mutation("a1", 1, "x", Some(3)), mutation("a2", 2, "x", Some(3))];
        assert_eq!(chain_base_revision(&outbox, "match", "x", Some(5)), Some(3));
        assert_eq!(chain_base_revision(&outbox, "match", "y", Some(5)), Some(5));
        assert_eq!(chain_base_revision(&outbox, "match", "y", None), None);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_batches_preserve_entity_order(
                entities in proptest::collection::vec(0u8..4, 1..40),
                max_size in 1usize..10,
            ) {
                let mut outbox: Vec<Mutation> = entities
                    .iter()
                    .enumerate()
                    .map(|(i, e)| mutation(&format!("m{i}"), i as u64 + 1, &format!("e{e}"), Some(1)))
                    .collect();

                // Drain the outbox batch by batch, acknowledging everything.
                let mut pushed: Vec<(String, u64)> = Vec::new();
                while !outbox.is_empty() {
                    let batch: Vec<(String, String, u64)> = plan_batch(&outbox, max_size, 0, u64::MAX)
                        .iter()
                        .map(|m| (m.id.clone(), m.entity_id.clone(), m.seq))
                        .collect();
                    prop_assert!(!batch.is_empty());
                    prop_assert!(batch.len() <= max_size);

                    let mut entities_in_batch = BTreeSet::new();
                    for (id, entity, seq) in batch {
                        prop_assert!(entities_in_batch.insert(entity.clone()));
                        pushed.push((entity, seq));
                        outbox.retain(|m| m.id != id);
                    }
                }

                // Within every entity, push order equals enqueue order.
                for e in 0u8..4 {
                    let name = format!("e{e}");
                    let seqs: Vec<u64> = pushed.iter().filter(|(en, _)| *en == name).map(|(_, s)| *s).collect();
                    let mut sorted = seqs.clone();
                    sorted.sort_unstable();
                    prop_assert_eq!(seqs, sorted);
                }
            }
        }
    }
}
