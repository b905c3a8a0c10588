//! The sync scheduler: drives reconciliation cycles and owns the lifecycle.
//!
//! ```text
//! stopped --start()--> running --stop()--> stopped
//! ```
//!
//! A running scheduler cycles once immediately, then on every interval tick
//! and on every trigger (a forced sync or restored connectivity). Triggers
//! that arrive while a cycle is in flight collapse into one follow-up cycle.
//! `stop()` is cooperative: it waits for the cycle in flight and prevents new
//! ones, it never aborts a push/pull pair halfway.
//!
//! Each cycle pushes queued mutations, applies the outcomes, pulls remote
//! changes since the persisted cursor and applies them. Every outcome is
//! committed to the local store in a single transaction together with the
//! confirmation state it changed.

use crate::config::SyncConfig;
use crate::confirmation::{ConfirmationTracker, ConfirmationUpdate};
use crate::conflict::ConflictDetector;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventHub, SyncEvent, SyncStatus};
use crate::queue::MutationQueue;
use crate::reconciler::RemoteReconciler;
use crate::store::{LocalStore, WriteBatch, WriteOp};
use matchsync_engine::{
    Clock, Cursor, EntitySnapshot, Mutation, MutationId, MutationOutcome, Timestamp,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Summary of one completed reconciliation cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    /// Mutations pushed, in push order
    pub attempted: Vec<MutationId>,
    pub acknowledged: usize,
    pub rejected: usize,
    pub conflicted: usize,
    /// Mutations sent back to the queue after a transient failure
    pub retrying: usize,
    /// Snapshots received from the remote store
    pub pulled: usize,
    /// Pulled snapshots newer than the local copy
    pub applied: usize,
    /// Cursor after the cycle
    pub cursor: Cursor,
    /// The pull was skipped because the remote store was unreachable
    pub pull_skipped: bool,
}

/// Ephemeral state of the cycle in flight. Never persisted.
struct SyncSession {
    report: CycleReport,
}

impl SyncSession {
    fn begin(started_at: Timestamp) -> Self {
        Self {
            report: CycleReport {
                started_at,
                ..CycleReport::default()
            },
        }
    }

    fn finish(mut self, finished_at: Timestamp) -> CycleReport {
        self.report.finished_at = finished_at;
        self.report
    }
}

struct Running {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Orchestrates the queue, the reconciler, the conflict detector and the
/// confirmation tracker.
pub struct SyncScheduler {
    store: Arc<dyn LocalStore>,
    queue: Arc<MutationQueue>,
    reconciler: RemoteReconciler,
    detector: ConflictDetector,
    tracker: Arc<ConfirmationTracker>,
    events: Arc<EventHub>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    /// Held for the whole of a cycle
    cycle: tokio::sync::Mutex<()>,
    trigger: Notify,
    halted: AtomicBool,
    running: parking_lot::Mutex<Option<Running>>,
}

impl SyncScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn LocalStore>,
        queue: Arc<MutationQueue>,
        reconciler: RemoteReconciler,
        detector: ConflictDetector,
        tracker: Arc<ConfirmationTracker>,
        events: Arc<EventHub>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            queue,
            reconciler,
            detector,
            tracker,
            events,
            clock,
            config,
            cycle: tokio::sync::Mutex::new(()),
            trigger: Notify::new(),
            halted: AtomicBool::new(false),
            running: parking_lot::Mutex::new(None),
        }
    }

    /// Transition to `running` and schedule an immediate cycle.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(self: &Arc<Self>) -> SyncResult<()> {
        self.check_halted()?;
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return Err(SyncError::AlreadyRunning);
        }

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(self).run(stop_rx));
        *running = Some(Running { stop, handle });

        tracing::info!(
            interval_ms = self.config.sync_interval.as_millis() as u64,
            client_id = %self.config.client_id,
            "sync scheduler started"
        );
        Ok(())
    }

    /// Stop scheduling cycles, waiting for the one in flight to finish.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        let _ = running.stop.send(true);
        if let Err(e) = running.handle.await {
            tracing::error!(error = %e, "sync task ended abnormally");
        }
        tracing::info!("sync scheduler stopped");
    }

    /// Ask the task to stop after its current cycle without waiting.
    pub fn signal_stop(&self) {
        if let Some(running) = self.running.lock().take() {
            let _ = running.stop.send(true);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Whether storage corruption stopped the engine for good.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Request an out-of-cycle sync. Returns `false` when not running.
    pub fn trigger(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.trigger.notify_one();
        true
    }

    async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        if let Err(e) = self.recover().await {
            self.handle_failure(&e);
            return;
        }

        let mut interval = tokio::time::interval(self.config.sync_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop.changed() => break,
                _ = interval.tick() => {}
                _ = self.trigger.notified() => {}
            }
            if *stop.borrow() {
                break;
            }
            if let Err(e) = self.run_once().await {
                if e.halts_engine() {
                    break;
                }
            }
        }
    }

    /// Put mutations left in flight by a previous session back in the queue.
    async fn recover(&self) -> SyncResult<()> {
        let _cycle = self.cycle.lock().await;
        let released = self.queue.release_in_flight()?;
        if released > 0 {
            tracing::info!(released, "recovered in-flight mutations");
        }
        Ok(())
    }

    /// Run one reconciliation cycle now, waiting for any cycle in flight.
    ///
    /// Transient network failures are absorbed on both the push and the pull
    /// side: the cycle still returns a report and the status goes back to
    /// `idle`. Failures that abort the session are returned after the status
    /// has been set to `error`.
    pub async fn run_once(&self) -> SyncResult<CycleReport> {
        self.check_halted()?;
        let _cycle = self.cycle.lock().await;
        self.check_halted()?;

        let mut session = SyncSession::begin(self.clock.now_millis());
        self.events.set_status(SyncStatus::Syncing, None);

        match self.drive(&mut session).await {
            Ok(()) => {
                let report = session.finish(self.clock.now_millis());
                self.events.set_status(SyncStatus::Idle, None);
                tracing::info!(
                    pushed = report.attempted.len(),
                    acknowledged = report.acknowledged,
                    rejected = report.rejected,
                    conflicted = report.conflicted,
                    retrying = report.retrying,
                    pulled = report.pulled,
                    applied = report.applied,
                    "sync cycle completed"
                );
                Ok(report)
            }
            Err(e) => {
                if !e.halts_engine() {
                    if let Err(release) = self.queue.release_in_flight() {
                        self.handle_failure(&release);
                        return Err(release);
                    }
                }
                self.handle_failure(&e);
                Err(e)
            }
        }
    }

    fn check_halted(&self) -> SyncResult<()> {
        if self.is_halted() {
            return Err(SyncError::StorageCorruption(
                "sync halted after a storage failure".into(),
            ));
        }
        Ok(())
    }

    fn handle_failure(&self, error: &SyncError) {
        if error.halts_engine() {
            self.halted.store(true, Ordering::SeqCst);
            tracing::error!(error = %error, "local storage failed, halting sync");
        } else if error.aborts_session() {
            tracing::error!(error = %error, "sync session aborted");
        } else {
            tracing::error!(error = %error, "sync cycle failed");
        }
        self.events
            .set_status(SyncStatus::Error, Some(error.to_string()));
    }

    async fn drive(&self, session: &mut SyncSession) -> SyncResult<()> {
        if !self.push(session).await? {
            return self.skip_pull(session);
        }
        match self.pull(session).await {
            Err(e) if e.is_retryable() => {
                tracing::warn!(error = %e, "pull deferred");
                self.skip_pull(session)
            }
            other => other,
        }
    }

    /// Leave the cursor where the last committed page put it.
    fn skip_pull(&self, session: &mut SyncSession) -> SyncResult<()> {
        session.report.pull_skipped = true;
        session.report.cursor = self.store.cursor()?;
        Ok(())
    }

    /// Push rounds until the batch budget is spent or nothing is eligible.
    ///
    /// Only mutations enqueued before the cycle started are taken. Returns
    /// `false` when the remote store was unreachable.
    async fn push(&self, session: &mut SyncSession) -> SyncResult<bool> {
        let ceiling = self.queue.max_sequence();
        let mut budget = self.config.max_batch_size;

        while budget > 0 {
            let batch = self.queue.next_batch(budget, ceiling)?;
            if batch.is_empty() {
                break;
            }
            budget = budget.saturating_sub(batch.len());
            session
                .report
                .attempted
                .extend(batch.iter().map(|m| m.id.clone()));

            let outcomes = match self.reconciler.push(&batch).await {
                Ok(outcomes) => outcomes,
                Err(e) if e.is_retryable() => {
                    tracing::warn!(error = %e, count = batch.len(), "push deferred");
                    let reason = e.to_string();
                    for mutation in &batch {
                        self.queue.mark_failed(&mutation.id, true, reason.as_str())?;
                    }
                    session.report.retrying += batch.len();
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };

            for (mutation, outcome) in outcomes {
                self.apply_outcome(session, &mutation, outcome)?;
            }
        }
        Ok(true)
    }

    fn apply_outcome(
        &self,
        session: &mut SyncSession,
        mutation: &Mutation,
        outcome: MutationOutcome,
    ) -> SyncResult<()> {
        match outcome {
            MutationOutcome::Acknowledged { snapshot } => {
                let snapshot = snapshot.synced_at(self.clock.now_millis());
                let mut writes = WriteBatch::new();
                let mut confirmations = ConfirmationUpdate::default();
                if self.is_newer(&snapshot)? {
                    confirmations = self.tracker.observe(std::slice::from_ref(&snapshot))?;
                    writes.push(WriteOp::PutSnapshot(snapshot.clone()));
                    writes.extend(confirmations.writes.drain(..));
                }
                self.queue.acknowledge_applied(mutation, &snapshot, writes)?;
                self.publish_transitions(&confirmations);
                session.report.acknowledged += 1;
            }
            MutationOutcome::Rejected { reason } => {
                let rejection = SyncError::ValidationRejection {
                    mutation_id: mutation.id.clone(),
                    reason: reason.clone(),
                };
                tracing::warn!(
                    entity = %mutation.key(),
                    error = %rejection,
                    "mutation rejected"
                );
                self.queue
                    .mark_failed(&mutation.id, false, rejection.to_string())?;
                self.events.publish(SyncEvent::MutationFailed {
                    mutation_id: mutation.id.clone(),
                    reason,
                });
                session.report.rejected += 1;
            }
            MutationOutcome::Conflicted { server } => {
                self.detector.handle(mutation, server.as_ref())?;
                session.report.conflicted += 1;
            }
        }
        Ok(())
    }

    /// Pull pages until the remote store has nothing more or the page budget
    /// is spent. Each page commits with its cursor.
    async fn pull(&self, session: &mut SyncSession) -> SyncResult<()> {
        let mut cursor = self.store.cursor()?;

        for _ in 0..self.config.max_pull_pages {
            let page = self
                .reconciler
                .pull(&cursor, self.config.pull_page_size)
                .await?;
            session.report.pulled += page.snapshots.len();

            let now = self.clock.now_millis();
            let mut fresh = Vec::new();
            for snapshot in page.snapshots {
                if self.is_newer(&snapshot)? {
                    fresh.push(snapshot.synced_at(now));
                }
            }

            let mut confirmations = self.tracker.observe(&fresh)?;
            let mut writes = WriteBatch::new();
            session.report.applied += fresh.len();
            writes.extend(fresh.into_iter().map(WriteOp::PutSnapshot));
            writes.extend(confirmations.writes.drain(..));
            if page.cursor != cursor {
                writes.push(WriteOp::SetCursor(page.cursor.clone()));
            }
            if !writes.is_empty() {
                self.store.commit(writes)?;
            }
            self.publish_transitions(&confirmations);

            cursor = page.cursor;
            if !page.has_more {
                break;
            }
        }

        session.report.cursor = cursor;
        Ok(())
    }

    fn is_newer(&self, snapshot: &EntitySnapshot) -> SyncResult<bool> {
        Ok(self
            .store
            .get(&snapshot.key())?
            .map_or(true, |local| snapshot.supersedes(&local)))
    }

    fn publish_transitions(&self, update: &ConfirmationUpdate) {
        for change in update.changes() {
            self.events.publish(SyncEvent::ConfirmationChanged {
                match_id: change.match_id.to_string(),
                from: change.transition.from,
                to: change.transition.to,
            });
        }
    }
}
