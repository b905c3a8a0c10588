//! Push handler - applies mutations under optimistic concurrency.

use crate::db;
use crate::error::{AppError, Result};
use crate::AppState;
use matchsync_engine::{
    decide, Decision, EntitySnapshot, MutationOutcome, PushMutation, PushRequest, PushResponse,
    PushResult,
};
use sqlx::PgPool;

/// Process a push request from a client.
///
/// Each mutation runs in its own transaction, in request order, so earlier
/// mutations of a batch are visible to later ones.
pub async fn handle_push(
    state: &AppState,
    user: Option<&str>,
    request: PushRequest,
) -> Result<PushResponse> {
    if request.client_id.trim().is_empty() {
        return Err(AppError::BadRequest("clientId is required".to_string()));
    }
    if request.mutations.len() > state.config.push_max_mutations {
        return Err(AppError::BadRequest(format!(
            "at most {} mutations per push",
            state.config.push_max_mutations
        )));
    }

    let mut results = Vec::with_capacity(request.mutations.len());
    for mut mutation in request.mutations {
        // The authenticated attribution wins over the client's claim
        if let Some(user) = user {
            mutation.author = Some(user.to_string());
        }
        let outcome = push_one(&state.pool, &request.client_id, &mutation).await?;
        tracing::debug!(
            mutation_id = %mutation.id,
            entity = %format!("{}/{}", mutation.entity_type, mutation.entity_id),
            outcome = outcome_name(&outcome),
            "mutation processed"
        );
        results.push(PushResult {
            mutation_id: mutation.id,
            outcome,
        });
    }

    tracing::info!(
        client_id = %request.client_id,
        count = results.len(),
        acknowledged = results.iter().filter(|r| r.outcome.is_acknowledged()).count(),
        "push processed"
    );
    Ok(PushResponse { results })
}

async fn push_one(pool: &PgPool, client_id: &str, mutation: &PushMutation) -> Result<MutationOutcome> {
    if let Some(snapshot) = db::applied_snapshot(pool, &mutation.id).await? {
        return Ok(MutationOutcome::Acknowledged { snapshot });
    }

    let mut tx = pool.begin().await?;
    let current = db::lock_entity(&mut tx, &mutation.entity_type, &mutation.entity_id)
        .await?
        .map(|stored| stored.to_snapshot());

    match decide(current.as_ref(), mutation) {
        Decision::Reject(reason) => Ok(MutationOutcome::Rejected { reason }),
        Decision::Conflict => Ok(MutationOutcome::Conflicted { server: current }),
        Decision::Apply(snapshot) => {
            let written = apply(&mut tx, client_id, mutation, &snapshot, current.is_none()).await;
            match written {
                Ok(()) => {
                    tx.commit().await?;
                    Ok(MutationOutcome::Acknowledged { snapshot })
                }
                Err(e) if db::is_unique_violation(&e) => {
                    tx.rollback().await?;
                    lost_race(pool, mutation).await
                }
                Err(e) => Err(e.into()),
            }
        }
    }
}

async fn apply(
    conn: &mut sqlx::PgConnection,
    client_id: &str,
    mutation: &PushMutation,
    snapshot: &EntitySnapshot,
    created: bool,
) -> std::result::Result<(), sqlx::Error> {
    db::write_entity(&mut *conn, snapshot, created).await?;
    db::record_applied(conn, client_id, mutation, snapshot).await
}

/// A concurrent request applied the same mutation id or created the same
/// entity first.
async fn lost_race(pool: &PgPool, mutation: &PushMutation) -> Result<MutationOutcome> {
    if let Some(snapshot) = db::applied_snapshot(pool, &mutation.id).await? {
        return Ok(MutationOutcome::Acknowledged { snapshot });
    }
    let server = db::get_entity(pool, &mutation.entity_type, &mutation.entity_id)
        .await?
        .map(|stored| stored.to_snapshot());
    tracing::warn!(mutation_id = %mutation.id, "lost a concurrent write race");
    Ok(MutationOutcome::Conflicted { server })
}

fn outcome_name(outcome: &MutationOutcome) -> &'static str {
    match outcome {
        MutationOutcome::Acknowledged { .. } => "acknowledged",
        MutationOutcome::Rejected { .. } => "rejected",
        MutationOutcome::Conflicted { .. } => "conflicted",
    }
}
