//! Sync endpoint routes.

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use matchsync_engine::{PullResponse, PushRequest, PushResponse};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{handle_pull, handle_push, PullQuery};
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync/push", post(push_handler))
        .route("/sync/pull", get(pull_handler))
}

/// POST /sync/push - Apply mutations.
async fn push_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>> {
    let response = handle_push(&state, auth.user.as_deref(), request).await?;
    Ok(Json(response))
}

/// GET /sync/pull - Entities changed after a cursor.
async fn pull_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<PullQuery>,
) -> Result<Json<PullResponse>> {
    let response = handle_pull(&state, query).await?;
    Ok(Json(response))
}
