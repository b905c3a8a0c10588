//! Matchsync Server - reference remote store for the matchsync client.
//!
//! Accepts pushed mutations under optimistic concurrency and serves changed
//! entities through a cursor-paged pull, using the matchsync-engine rules
//! for every decision.
//!
//! ## Endpoints
//!
//! | Method | Path          | Purpose                                  |
//! |--------|---------------|------------------------------------------|
//! | GET    | `/`           | Banner                                   |
//! | GET    | `/health`     | Liveness and version                     |
//! | POST   | `/sync/push`  | Apply a batch of mutations               |
//! | GET    | `/sync/pull`  | Entities changed after `cursor`          |

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod routes;

use crate::config::Config;
use crate::db::Pool;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(pool: Pool, config: Config) -> Self {
        Self {
            pool,
            config: Arc::new(config),
        }
    }
}

/// Build the application router with its layers.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
