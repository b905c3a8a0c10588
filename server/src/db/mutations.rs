//! Database operations for the applied_mutations table.

use matchsync_engine::{EntitySnapshot, PushMutation};
use sqlx::{PgConnection, PgPool};

/// Snapshot a mutation produced when it was first applied, if it was.
pub async fn applied_snapshot(
    pool: &PgPool,
    mutation_id: &str,
) -> Result<Option<EntitySnapshot>, sqlx::Error> {
    let row: Option<(serde_json::Value,)> =
        sqlx::query_as(r#"SELECT snapshot FROM applied_mutations WHERE mutation_id = $1"#)
            .bind(mutation_id)
            .fetch_optional(pool)
            .await?;

    row.map(|(snapshot,)| {
        serde_json::from_value(snapshot).map_err(|e| sqlx::Error::Decode(Box::new(e)))
    })
    .transpose()
}

/// Record an acknowledged mutation. Fails with a unique violation when the
/// same id was applied concurrently.
pub async fn record_applied(
    conn: &mut PgConnection,
    client_id: &str,
    mutation: &PushMutation,
    snapshot: &EntitySnapshot,
) -> Result<(), sqlx::Error> {
    let stored = serde_json::to_value(snapshot).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    sqlx::query(
        r#"
        INSERT INTO applied_mutations (
            mutation_id, client_id, author, entity_type, entity_id, snapshot
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(&mutation.id)
    .bind(client_id)
    .bind(&mutation.author)
    .bind(&mutation.entity_type)
    .bind(&mutation.entity_id)
    .bind(stored)
    .execute(conn)
    .await?;

    Ok(())
}
