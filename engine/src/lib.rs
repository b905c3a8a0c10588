//! # Matchsync Engine
//!
//! The deterministic core of an offline-first score synchronization engine.
//!
//! Competitors record match results on devices that may be offline. Every
//! change becomes a [`Mutation`] in a durable outbox, is pushed to a remote
//! store with the revision its author last saw, and is either acknowledged,
//! rejected, or parked as a conflict. Two players' independently submitted
//! scores converge through the [`MatchConfirmation`] state machine.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine knows nothing about files, network, or clocks
//! - **Deterministic**: same inputs, same outputs; time is always an argument
//! - **No silent merges**: a stale write is a conflict, never last-writer-wins
//!
//! ## Core Concepts
//!
//! ### Snapshots and mutations
//!
//! An [`EntitySnapshot`] is the last server-confirmed state of an entity. A
//! [`Mutation`] is an intended write against one entity, carrying its base
//! revision. [`plan_batch`] picks what to push next while preserving
//! per-entity order; [`rebase_successors`] moves queued successors onto the
//! revision their predecessor produced.
//!
//! ### Revisions
//!
//! [`decide`] is the optimistic-concurrency rule a remote store applies to
//! each pushed mutation. Both the reference server and the in-memory test
//! remote use it.
//!
//! ### Confirmation
//!
//! ```text
//! pending -> partial -> confirmed | disputed -> completed
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use matchsync_engine::{
//!     decide, ConfirmationEvent, ConfirmationStatus, Decision, MatchConfirmation,
//!     Mutation, MutationOp, PushMutation, Score, ScoreSubmission, ScoreTolerance,
//! };
//! use serde_json::json;
//!
//! // A create against an empty server applies at revision 1
//! let m = Mutation::new("mut-1", "match", "m-1", MutationOp::Create,
//!     json!({"playerOne": "alice", "playerTwo": "bob"}), None, 1706745600000);
//! let Decision::Apply(snapshot) = decide(None, &PushMutation::from(&m)) else {
//!     panic!("expected apply");
//! };
//! assert_eq!(snapshot.revision, 1);
//!
//! // Two agreeing submissions confirm the match
//! let tolerance = ScoreTolerance::exact();
//! let mut confirmation = MatchConfirmation::new("m-1");
//! for player in ["alice", "bob"] {
//!     let submission = ScoreSubmission {
//!         match_id: "m-1".into(),
//!         player_id: player.into(),
//!         score: Score::new(7, 150, 300),
//!         revision: 1,
//!     };
//!     confirmation.apply(ConfirmationEvent::ScoreSynced(submission), &tolerance).unwrap();
//! }
//! assert_eq!(confirmation.status, ConfirmationStatus::Confirmed);
//! ```

pub mod backoff;
pub mod clock;
pub mod confirmation;
pub mod conflict;
pub mod error;
pub mod mutation;
pub mod outbox;
pub mod protocol;
pub mod revision;
pub mod snapshot;

// Re-export main types at crate root
pub use backoff::BackoffPolicy;
pub use clock::{Clock, ManualClock, SystemClock};
pub use confirmation::{
    submission_id, ConfirmationEvent, ConfirmationStatus, MatchConfirmation, MatchRecord, Score,
    ScoreSubmission, ScoreTolerance, Transition, MATCH_ENTITY, SCORE_SUBMISSION_ENTITY,
};
pub use conflict::ConflictRecord;
pub use error::{Error, Result};
pub use mutation::{Mutation, MutationOp, MutationStatus};
pub use outbox::{chain_base_revision, plan_batch, rebase_successors};
pub use protocol::{
    Cursor, MutationOutcome, PullResponse, PushMutation, PushRequest, PushResponse, PushResult,
};
pub use revision::{decide, merge_delta, Decision};
pub use snapshot::{EntityKey, EntitySnapshot};

/// Type aliases for clarity
pub type EntityType = String;
pub type EntityId = String;
pub type MutationId = String;
pub type UserId = String;
pub type Revision = u64;
pub type Timestamp = u64;
