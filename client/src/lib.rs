//! # Matchsync Client
//!
//! The on-device half of matchsync: a durable outbox in front of a remote
//! store, reconciled by a background scheduler.
//!
//! ## Architecture
//!
//! ```text
//! SyncEngine ─┬─ MutationQueue ──── LocalStore (SQLite / memory)
//!             ├─ SyncScheduler ─┬─ RemoteReconciler ── RemoteTransport (HTTP / memory)
//!             │                 ├─ ConflictDetector
//!             │                 └─ ConfirmationTracker
//!             └─ EventHub ───────── subscribers
//! ```
//!
//! Writes are queued locally and return immediately. A running engine pushes
//! them in per-entity order, applies acknowledgments, parks conflicts for a
//! human to resolve, and pulls remote changes. Match confirmation only ever
//! moves on data the remote store has acknowledged.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use matchsync_client::{
//!     HttpTransport, IdentityProvider, SqliteStore, StaticIdentity, SyncConfig, SyncEngine,
//!     SyncEvent,
//! };
//! use std::sync::Arc;
//!
//! # async fn demo() -> matchsync_client::SyncResult<()> {
//! let identity: Arc<dyn IdentityProvider> = Arc::new(StaticIdentity::new("alice"));
//! let engine = SyncEngine::new(
//!     Arc::new(SqliteStore::open("matchsync.db")?),
//!     Arc::new(
//!         HttpTransport::new("https://scores.example.com")?
//!             .with_token("secret")
//!             .with_identity(identity.clone()),
//!     ),
//!     identity,
//!     SyncConfig::from_env()?,
//! )?;
//!
//! let mut events = engine.subscribe();
//! engine.start()?;
//!
//! while let Some(event) = events.recv().await {
//!     if let SyncEvent::Conflict { record } = event {
//!         println!("conflict on {}", record.key());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod confirmation;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod events;
pub mod identity;
pub mod queue;
pub mod reconciler;
pub mod scheduler;
pub mod store;
pub mod transport;

pub use config::{ConfigError, SyncConfig};
pub use confirmation::{ConfirmationChange, ConfirmationTracker, ConfirmationUpdate};
pub use conflict::ConflictDetector;
pub use engine::{MatchStatus, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use events::{EventHub, Subscription, SyncEvent, SyncStatus};
pub use identity::{IdentityProvider, StaticIdentity};
pub use queue::MutationQueue;
pub use reconciler::RemoteReconciler;
pub use scheduler::{CycleReport, SyncScheduler};
pub use store::{LocalStore, MemoryStore, SqliteStore, WriteBatch, WriteOp};
pub use transport::{AppliedMutation, HttpTransport, InMemoryRemote, RemoteTransport};
