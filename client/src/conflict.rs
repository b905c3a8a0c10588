//! The conflict detector.
//!
//! Turns a `conflicted` push outcome into a [`ConflictRecord`], parks the
//! mutation, and tells subscribers. It never picks a winner.

use crate::error::SyncResult;
use crate::events::{EventHub, SyncEvent};
use crate::queue::MutationQueue;
use matchsync_engine::{Clock, ConflictRecord, EntitySnapshot, Mutation};
use std::sync::Arc;

pub struct ConflictDetector {
    queue: Arc<MutationQueue>,
    events: Arc<EventHub>,
    clock: Arc<dyn Clock>,
}

impl ConflictDetector {
    pub fn new(queue: Arc<MutationQueue>, events: Arc<EventHub>, clock: Arc<dyn Clock>) -> Self {
        Self {
            queue,
            events,
            clock,
        }
    }

    /// Record the conflict between `mutation` and the server's state.
    ///
    /// Returns the record, or `None` if the mutation was discarded meanwhile.
    pub fn handle(
        &self,
        mutation: &Mutation,
        server: Option<&EntitySnapshot>,
    ) -> SyncResult<Option<ConflictRecord>> {
        let record = ConflictRecord::detect(mutation, server, self.clock.now_millis());
        if !self.queue.mark_conflicted(&record)? {
            return Ok(None);
        }

        tracing::warn!(
            mutation_id = %mutation.id,
            entity = %record.key(),
            local_base = ?record.local_base_revision,
            remote_revision = ?record.remote_revision,
            "revision conflict"
        );
        self.events.publish(SyncEvent::Conflict {
            record: record.clone(),
        });
        Ok(Some(record))
    }
}
