//! Database operations for the entities table.

use matchsync_engine::{EntitySnapshot, Revision};
use sqlx::{PgConnection, PgPool, Row};

/// Serializes change-sequence allocation with commit, so sequence numbers
/// become visible in order.
const CHANGE_STREAM_LOCK: i64 = 0x6d61_7463_6873_796e;

/// A stored entity row from the database.
#[derive(Debug)]
pub struct StoredEntity {
    pub entity_type: String,
    pub entity_id: String,
    pub payload: serde_json::Value,
    pub revision: i64,
    pub deleted: bool,
    pub change_seq: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredEntity {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEntity {
            entity_type: row.try_get("entity_type")?,
            entity_id: row.try_get("entity_id")?,
            payload: row.try_get("payload")?,
            revision: row.try_get("revision")?,
            deleted: row.try_get("deleted")?,
            change_seq: row.try_get("change_seq")?,
        })
    }
}

impl StoredEntity {
    /// Convert database row to an engine snapshot.
    pub fn to_snapshot(&self) -> EntitySnapshot {
        let mut snapshot = EntitySnapshot::new(
            self.entity_type.clone(),
            self.entity_id.clone(),
            self.payload.clone(),
            self.revision.max(0) as Revision,
        );
        snapshot.deleted = self.deleted;
        snapshot
    }
}

/// Convert an engine revision for storage.
pub fn revision_to_db(revision: Revision) -> Result<i64, sqlx::Error> {
    i64::try_from(revision).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

/// Read an entity and lock its row until the transaction ends.
pub async fn lock_entity(
    conn: &mut PgConnection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Option<StoredEntity>, sqlx::Error> {
    sqlx::query_as::<_, StoredEntity>(
        r#"
        SELECT entity_type, entity_id, payload, revision, deleted, change_seq
        FROM entities
        WHERE entity_type = $1 AND entity_id = $2
        FOR UPDATE
        "#,
    )
    .bind(entity_type)
    .bind(entity_id)
    .fetch_optional(conn)
    .await
}

/// Get an entity without locking it.
pub async fn get_entity(
    pool: &PgPool,
    entity_type: &str,
    entity_id: &str,
) -> Result<Option<StoredEntity>, sqlx::Error> {
    sqlx::query_as::<_, StoredEntity>(
        r#"
        SELECT entity_type, entity_id, payload, revision, deleted, change_seq
        FROM entities
        WHERE entity_type = $1 AND entity_id = $2
        "#,
    )
    .bind(entity_type)
    .bind(entity_id)
    .fetch_optional(pool)
    .await
}

/// Write a snapshot with a fresh change sequence number.
///
/// `created` inserts without an upsert so a concurrent create of the same
/// entity fails with a unique violation.
pub async fn write_entity(
    conn: &mut PgConnection,
    snapshot: &EntitySnapshot,
    created: bool,
) -> Result<i64, sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(CHANGE_STREAM_LOCK)
        .execute(&mut *conn)
        .await?;

    let sql = if created {
        r#"
        INSERT INTO entities (entity_type, entity_id, payload, revision, deleted, change_seq)
        VALUES ($1, $2, $3, $4, $5, nextval('entity_change_seq'))
        RETURNING change_seq
        "#
    } else {
        r#"
        UPDATE entities
        SET payload = $3,
            revision = $4,
            deleted = $5,
            change_seq = nextval('entity_change_seq'),
            updated_at = NOW()
        WHERE entity_type = $1 AND entity_id = $2
        RETURNING change_seq
        "#
    };

    let (change_seq,): (i64,) = sqlx::query_as(sql)
        .bind(&snapshot.entity_type)
        .bind(&snapshot.entity_id)
        .bind(&snapshot.payload)
        .bind(revision_to_db(snapshot.revision)?)
        .bind(snapshot.deleted)
        .fetch_one(conn)
        .await?;

    Ok(change_seq)
}

/// Entities changed after `since`, oldest change first.
pub async fn entities_since(
    pool: &PgPool,
    since: i64,
    limit: i64,
) -> Result<Vec<StoredEntity>, sqlx::Error> {
    sqlx::query_as::<_, StoredEntity>(
        r#"
        SELECT entity_type, entity_id, payload, revision, deleted, change_seq
        FROM entities
        WHERE change_seq > $1
        ORDER BY change_seq ASC
        LIMIT $2
        "#,
    )
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await
}
