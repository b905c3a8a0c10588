//! The public face of the client: one explicit engine instance per device.

use crate::config::SyncConfig;
use crate::confirmation::ConfirmationTracker;
use crate::conflict::ConflictDetector;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventHub, Subscription, SyncStatus};
use crate::identity::IdentityProvider;
use crate::queue::MutationQueue;
use crate::reconciler::RemoteReconciler;
use crate::scheduler::{CycleReport, SyncScheduler};
use crate::store::LocalStore;
use crate::transport::RemoteTransport;
use matchsync_engine::{
    submission_id, Clock, ConfirmationStatus, ConflictRecord, EntityId,
    EntityKey, EntitySnapshot, Mutation, MutationOp, Score, ScoreSubmission, SystemClock,
    MATCH_ENTITY, SCORE_SUBMISSION_ENTITY,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// Everything the application needs to render a match's confirmation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchStatus {
    pub match_id: EntityId,
    pub status: ConfirmationStatus,
    /// Synced submissions, ordered by player
    pub submissions: Vec<ScoreSubmission>,
    /// Both submissions when the match is disputed, for manual review
    pub disputed: Option<(ScoreSubmission, ScoreSubmission)>,
    /// Open conflicts on the match or its submissions
    pub conflicts: Vec<ConflictRecord>,
}

/// Offline-first sync engine.
///
/// Writes go to the local outbox and return at once; a background scheduler
/// reconciles them with the remote store while running.
///
/// ```rust,no_run
/// use matchsync_client::{InMemoryRemote, MemoryStore, StaticIdentity, SyncConfig, SyncEngine};
/// use matchsync_engine::Score;
/// use std::sync::Arc;
///
/// # async fn demo() -> matchsync_client::SyncResult<()> {
/// let engine = SyncEngine::new(
///     Arc::new(MemoryStore::new()),
///     Arc::new(InMemoryRemote::new()),
///     Arc::new(StaticIdentity::new("alice")),
///     SyncConfig::default(),
/// )?;
/// engine.start()?;
/// engine.submit_score("m-1", Score::new(7, 150, 300))?;
/// engine.sync_now();
/// engine.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct SyncEngine {
    store: Arc<dyn LocalStore>,
    queue: Arc<MutationQueue>,
    tracker: Arc<ConfirmationTracker>,
    events: Arc<EventHub>,
    scheduler: Arc<SyncScheduler>,
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn LocalStore>,
        transport: Arc<dyn RemoteTransport>,
        identity: Arc<dyn IdentityProvider>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        Self::with_clock(store, transport, identity, config, Arc::new(SystemClock))
    }

    /// Like [`SyncEngine::new`] with an explicit clock.
    pub fn with_clock(
        store: Arc<dyn LocalStore>,
        transport: Arc<dyn RemoteTransport>,
        identity: Arc<dyn IdentityProvider>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> SyncResult<Self> {
        config.validate()?;

        let events = Arc::new(EventHub::new());
        let queue = Arc::new(MutationQueue::new(
            store.clone(),
            clock.clone(),
            config.backoff,
        )?);
        let tracker = Arc::new(ConfirmationTracker::new(store.clone(), config.tolerance));
        let reconciler = RemoteReconciler::new(transport, config.client_id.clone());
        let detector = ConflictDetector::new(queue.clone(), events.clone(), clock.clone());
        let scheduler = Arc::new(SyncScheduler::new(
            store.clone(),
            queue.clone(),
            reconciler,
            detector,
            tracker.clone(),
            events.clone(),
            clock.clone(),
            config,
        ));

        Ok(Self {
            store,
            queue,
            tracker,
            events,
            scheduler,
            identity,
            clock,
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start periodic syncing. Must be called within a tokio runtime.
    pub fn start(&self) -> SyncResult<()> {
        self.scheduler.start()
    }

    /// Stop syncing once the cycle in flight, if any, has finished.
    pub async fn stop(&self) {
        self.scheduler.stop().await
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Force a sync. Returns `false` when the engine is not running.
    pub fn sync_now(&self) -> bool {
        self.scheduler.trigger()
    }

    /// Connectivity notification; coming back online triggers a sync.
    pub fn connectivity_changed(&self, online: bool) {
        tracing::debug!(online, "connectivity changed");
        if online {
            self.scheduler.trigger();
        }
    }

    /// Run one cycle in the caller's task, whether or not the engine runs.
    pub async fn run_once(&self) -> SyncResult<CycleReport> {
        self.scheduler.run_once().await
    }

    // ========================================================================
    // Write path
    // ========================================================================

    /// Queue a write. Never touches the network.
    pub fn submit(
        &self,
        entity_type: &str,
        entity_id: &str,
        op: MutationOp,
        payload: serde_json::Value,
    ) -> SyncResult<Mutation> {
        let key = EntityKey::new(entity_type, entity_id);
        if !key.is_valid() {
            return Err(matchsync_engine::Error::MissingField {
                entity: "mutation".into(),
                field: if entity_type.is_empty() {
                    "entityType".into()
                } else {
                    "entityId".into()
                },
            }
            .into());
        }

        let mut mutation = Mutation::new(
            uuid::Uuid::new_v4().to_string(),
            entity_type,
            entity_id,
            op,
            payload,
            None,
            self.clock.now_millis(),
        );
        if let Some(user) = self.identity.current_user() {
            mutation = mutation.with_author(user);
        }
        self.queue.enqueue_on_latest(mutation)
    }

    /// Queue the current user's score for a match.
    ///
    /// The first submission creates the player's submission entity; later
    /// ones replace its values.
    pub fn submit_score(&self, match_id: &str, score: Score) -> SyncResult<Mutation> {
        score.validate()?;
        let player = self
            .identity
            .current_user()
            .ok_or_else(|| SyncError::Authorization("no signed-in user to submit a score".into()))?;

        let id = submission_id(match_id, &player);
        let key = EntityKey::new(SCORE_SUBMISSION_ENTITY, id.clone());
        // Outbox first: an acknowledgment moves the entry into the store in
        // one commit, so this order never misses both.
        let known = self
            .queue
            .all()?
            .iter()
            .any(|m| m.targets(SCORE_SUBMISSION_ENTITY, &id))
            || self.store.get(&key)?.is_some_and(|s| s.is_active());
        let op = if known {
            MutationOp::Update
        } else {
            MutationOp::Create
        };

        let payload = ScoreSubmission::payload(match_id, &player, &score);
        self.submit(SCORE_SUBMISSION_ENTITY, &id, op, payload)
    }

    // ========================================================================
    // Read path
    // ========================================================================

    /// The most recently reconciled snapshot, or `None` (also for deleted
    /// entities).
    pub fn get_local(&self, entity_type: &str, entity_id: &str) -> SyncResult<Option<EntitySnapshot>> {
        Ok(self
            .store
            .get(&EntityKey::new(entity_type, entity_id))?
            .filter(EntitySnapshot::is_active))
    }

    pub fn get_match_status(&self, match_id: &str) -> SyncResult<MatchStatus> {
        let confirmation = self.tracker.state(match_id)?;
        let disputed = confirmation
            .disputed_submissions()
            .map(|(a, b)| (a.clone(), b.clone()));
        let prefix = format!("{match_id}:");
        let conflicts = self
            .store
            .conflicts()?
            .into_iter()
            .filter(|c| match c.entity_type.as_str() {
                MATCH_ENTITY => c.entity_id == match_id,
                SCORE_SUBMISSION_ENTITY => c.entity_id.starts_with(&prefix),
                _ => false,
            })
            .collect();

        Ok(MatchStatus {
            match_id: match_id.to_string(),
            status: confirmation.status,
            submissions: confirmation.submissions.into_values().collect(),
            disputed,
            conflicts,
        })
    }

    pub fn status(&self) -> SyncStatus {
        self.events.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.events.watch_status()
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    // ========================================================================
    // Outbox and conflicts
    // ========================================================================

    /// Every mutation not yet acknowledged, oldest first.
    pub fn outbox(&self) -> SyncResult<Vec<Mutation>> {
        self.queue.all()
    }

    /// Parked conflicts awaiting resolution.
    pub fn conflicts(&self) -> SyncResult<Vec<ConflictRecord>> {
        self.store.conflicts()
    }

    /// Drop a failed or conflicted mutation.
    pub fn discard(&self, mutation_id: &str) -> SyncResult<bool> {
        self.queue.discard(mutation_id)
    }

    /// Queue a failed or conflicted mutation again, optionally corrected.
    pub fn resubmit(
        &self,
        mutation_id: &str,
        payload: Option<serde_json::Value>,
    ) -> SyncResult<Option<Mutation>> {
        let resubmitted = self.queue.resubmit(mutation_id, payload)?;
        if resubmitted.is_some() {
            self.scheduler.trigger();
        }
        Ok(resubmitted)
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.scheduler.signal_stop();
    }
}
