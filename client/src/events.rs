//! Notifications for the surrounding application.
//!
//! Every subscriber gets its own unbounded channel and receives each event
//! exactly once, in publication order. Subscribers that dropped their
//! receiver are pruned on the next publish.

use matchsync_engine::{ConfirmationStatus, ConflictRecord, EntityId, MutationId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::{mpsc, watch};

/// Coarse engine status for UI indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// An event published by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// The engine status changed; `error` describes why it is `Error`
    StatusChanged {
        status: SyncStatus,
        error: Option<String>,
    },
    /// A mutation was parked as conflicted
    Conflict { record: ConflictRecord },
    /// A mutation was rejected for good
    MutationFailed {
        mutation_id: MutationId,
        reason: String,
    },
    /// A match's confirmation status moved
    ConfirmationChanged {
        match_id: EntityId,
        from: ConfirmationStatus,
        to: ConfirmationStatus,
    },
}

/// Receiving end of a subscription.
pub type Subscription = mpsc::UnboundedReceiver<SyncEvent>;

/// Fans events out to subscribers and tracks the current status.
#[derive(Debug)]
pub struct EventHub {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SyncEvent>>>,
    status: watch::Sender<SyncStatus>,
}

impl EventHub {
    pub fn new() -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            subscribers: Mutex::new(Vec::new()),
            status,
        }
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Watch the current status.
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Current status.
    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    /// Deliver an event to every live subscriber.
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, event: SyncEvent) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        subscribers.len()
    }

    /// Update the status; publishes `StatusChanged` only on an actual change
    /// or when a new error is reported.
    pub fn set_status(&self, status: SyncStatus, error: Option<String>) {
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
        if changed || error.is_some() {
            tracing::debug!(%status, error = error.as_deref(), "sync status changed");
            self.publish(SyncEvent::StatusChanged { status, error });
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
