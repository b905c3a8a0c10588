//! Transport layer abstraction.
//!
//! A [`RemoteTransport`] moves protocol messages to and from the remote store
//! and classifies failures into the [`SyncError`](crate::SyncError) taxonomy.
//! Implementations: [`HttpTransport`] for a real server and
//! [`InMemoryRemote`] for tests and local simulation.

mod http;
mod memory;

pub use http::HttpTransport;
pub use memory::{AppliedMutation, InMemoryRemote};

use crate::error::SyncResult;
use async_trait::async_trait;
use matchsync_engine::{Cursor, PullResponse, PushRequest, PushResponse};

/// Network access to the remote store.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Push mutations; the response holds one outcome per mutation.
    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse>;

    /// Pull changes after `cursor`, at most `limit` snapshots.
    async fn pull(&self, cursor: &Cursor, limit: usize) -> SyncResult<PullResponse>;
}
