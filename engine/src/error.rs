//! Error types for the matchsync engine.

use crate::{EntityId, UserId};
use thiserror::Error;

/// All possible errors from the matchsync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Validation errors
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing field '{field}' in {entity}")]
    MissingField { entity: String, field: String },

    #[error("player {player_id} is not part of match {match_id}")]
    UnknownPlayer { match_id: EntityId, player_id: UserId },

    // State errors
    #[error("illegal confirmation transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
