//! Error types for the sync engine.

use crate::config::ConfigError;
use matchsync_engine::{EntityKey, MutationId};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while synchronizing.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote store could not be reached; retried with backoff.
    #[error("network unavailable: {0}")]
    TransientNetwork(String),

    /// Credentials were refused; fatal for the session.
    #[error("authorization failed: {0}")]
    Authorization(String),

    /// The remote store refused a mutation for good.
    #[error("mutation {mutation_id} rejected: {reason}")]
    ValidationRejection {
        mutation_id: MutationId,
        reason: String,
    },

    /// A mutation was based on a stale revision.
    #[error("mutation {mutation_id} conflicts with the remote state of {entity}")]
    RevisionConflict {
        mutation_id: MutationId,
        entity: EntityKey,
    },

    /// Local persistence is unreadable or unwritable.
    #[error("local storage corrupted: {0}")]
    StorageCorruption(String),

    /// The remote store answered with something that makes no sense.
    #[error("malformed server response: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Engine(#[from] matchsync_engine::Error),

    #[error("sync engine is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SyncError {
    /// Whether the operation may succeed if simply retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TransientNetwork(_))
    }

    /// Whether the engine must stop rather than keep operating.
    pub fn halts_engine(&self) -> bool {
        matches!(self, SyncError::StorageCorruption(_))
    }

    /// Whether the current session must be aborted.
    pub fn aborts_session(&self) -> bool {
        matches!(
            self,
            SyncError::Authorization(_)
                | SyncError::MalformedResponse(_)
                | SyncError::StorageCorruption(_)
        )
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::StorageCorruption(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::MalformedResponse(err.to_string())
        } else {
            SyncError::TransientNetwork(err.to_string())
        }
    }
}
