//! Pull handler - serves changed entities in change order.

use crate::db;
use crate::error::{AppError, Result};
use crate::AppState;
use matchsync_engine::{Cursor, PullResponse};
use serde::Deserialize;

/// Query parameters for pull sync.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullQuery {
    /// Cursor from the previous pull (empty for initial sync)
    #[serde(default)]
    pub cursor: Cursor,
    /// Maximum number of snapshots to return
    pub limit: Option<usize>,
}

/// Process a pull request from a client.
pub async fn handle_pull(state: &AppState, query: PullQuery) -> Result<PullResponse> {
    let since = i64::try_from(query.cursor.sequence()?)
        .map_err(|_| AppError::BadRequest(format!("cursor out of range: {}", query.cursor)))?;
    let limit = state.config.pull_limit(query.limit);

    // Fetch one more than requested to check if there are more
    let fetch = i64::try_from(limit + 1).unwrap_or(i64::MAX);
    let mut stored = db::entities_since(&state.pool, since, fetch).await?;

    let has_more = stored.len() > limit;
    stored.truncate(limit);

    let cursor = stored
        .last()
        .map_or(query.cursor, |last| Cursor::from_sequence(last.change_seq.max(0) as u64));

    tracing::debug!(since, returned = stored.len(), has_more, "pull served");
    Ok(PullResponse {
        snapshots: stored.iter().map(db::StoredEntity::to_snapshot).collect(),
        cursor,
        has_more,
    })
}
