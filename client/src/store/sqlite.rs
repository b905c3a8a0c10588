//! SQLite-backed durable store.

use super::{LocalStore, WriteBatch, WriteOp};
use crate::error::{SyncError, SyncResult};
use matchsync_engine::{
    ConflictRecord, Cursor, EntityKey, EntitySnapshot, MatchConfirmation, Mutation, MutationOp,
    MutationStatus,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

const CURSOR_KEY: &str = "pull_cursor";

const OUTBOX_COLUMNS: &str = "id, seq, entity_type, entity_id, op, payload, base_revision, author, \
     client_timestamp, attempts, status, next_attempt_at, last_error";

/// A [`LocalStore`] persisted in a SQLite database file.
///
/// The database runs in WAL mode with `synchronous=FULL`: once `commit`
/// returns, the batch survives a crash or power loss.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, migrate it and verify its
    /// integrity.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))?;
        Self::init(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> SyncResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> SyncResult<Self> {
        conn.execute_batch("PRAGMA synchronous = FULL;")?;

        let check: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if check != "ok" {
            return Err(SyncError::StorageCorruption(format!(
                "integrity check failed: {check}"
            )));
        }

        migrate(&mut conn)?;
        tracing::debug!(version = CURRENT_VERSION, "local store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn parse_snapshot(row: &Row<'_>) -> rusqlite::Result<EntitySnapshot> {
        Ok(EntitySnapshot {
            entity_type: row.get(0)?,
            entity_id: row.get(1)?,
            payload: row.get(2)?,
            revision: row.get(3)?,
            deleted: row.get::<_, i32>(4)? != 0,
            last_synced_at: row.get(5)?,
        })
    }

    fn parse_mutation(row: &Row<'_>) -> rusqlite::Result<Mutation> {
        let op: String = row.get(4)?;
        let status: String = row.get(10)?;
        Ok(Mutation {
            id: row.get(0)?,
            seq: row.get(1)?,
            entity_type: row.get(2)?,
            entity_id: row.get(3)?,
            op: op.parse::<MutationOp>().map_err(|e| invalid_column(4, e))?,
            payload: row.get(5)?,
            base_revision: row.get(6)?,
            author: row.get(7)?,
            client_timestamp: row.get(8)?,
            attempts: row.get(9)?,
            status: status
                .parse::<MutationStatus>()
                .map_err(|e| invalid_column(10, e))?,
            next_attempt_at: row.get(11)?,
            last_error: row.get(12)?,
        })
    }
}

fn invalid_column(index: usize, err: matchsync_engine::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
}

fn decode_json<T: serde::de::DeserializeOwned>(raw: &str) -> SyncResult<T> {
    serde_json::from_str(raw).map_err(|e| SyncError::StorageCorruption(e.to_string()))
}

fn encode_json<T: serde::Serialize>(value: &T) -> SyncResult<String> {
    serde_json::to_string(value).map_err(|e| SyncError::StorageCorruption(e.to_string()))
}

fn write_mutation(tx: &Transaction<'_>, sql: &str, m: &Mutation) -> SyncResult<usize> {
    Ok(tx.execute(
        sql,
        params![
            m.id,
            m.seq,
            m.entity_type,
            m.entity_id,
            m.op.as_str(),
            m.payload,
            m.base_revision,
            m.author,
            m.client_timestamp,
            m.attempts,
            m.status.as_str(),
            m.next_attempt_at,
            m.last_error,
        ],
    )?)
}

fn apply(tx: &Transaction<'_>, op: WriteOp) -> SyncResult<()> {
    match op {
        WriteOp::PutSnapshot(s) => {
            tx.execute(
                "INSERT OR REPLACE INTO snapshots
                 (entity_type, entity_id, payload, revision, deleted, last_synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    s.entity_type,
                    s.entity_id,
                    s.payload,
                    s.revision,
                    i32::from(s.deleted),
                    s.last_synced_at
                ],
            )?;
        }
        WriteOp::DeleteSnapshot(key) => {
            tx.execute(
                "DELETE FROM snapshots WHERE entity_type = ?1 AND entity_id = ?2",
                params![key.entity_type, key.entity_id],
            )?;
        }
        WriteOp::AppendMutation(m) => {
            write_mutation(
                tx,
                &format!(
                    "INSERT OR IGNORE INTO outbox ({OUTBOX_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                &m,
            )?;
        }
        WriteOp::UpdateMutation(m) => {
            write_mutation(
                tx,
                "UPDATE outbox SET seq = ?2, entity_type = ?3, entity_id = ?4, op = ?5,
                 payload = ?6, base_revision = ?7, author = ?8, client_timestamp = ?9,
                 attempts = ?10, status = ?11, next_attempt_at = ?12, last_error = ?13
                 WHERE id = ?1",
                &m,
            )?;
        }
        WriteOp::RemoveMutation(id) => {
            tx.execute("DELETE FROM outbox WHERE id = ?1", params![id])?;
        }
        WriteOp::PutConflict(record) => {
            tx.execute(
                "INSERT OR REPLACE INTO conflicts (mutation_id, record, detected_at)
                 VALUES (?1, ?2, ?3)",
                params![record.mutation_id, encode_json(&record)?, record.detected_at],
            )?;
        }
        WriteOp::RemoveConflict(id) => {
            tx.execute("DELETE FROM conflicts WHERE mutation_id = ?1", params![id])?;
        }
        WriteOp::PutConfirmation(confirmation) => {
            tx.execute(
                "INSERT OR REPLACE INTO confirmations (match_id, state) VALUES (?1, ?2)",
                params![confirmation.match_id, encode_json(&confirmation)?],
            )?;
        }
        WriteOp::SetCursor(cursor) => {
            tx.execute(
                "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?1, ?2)",
                params![CURSOR_KEY, cursor.as_str()],
            )?;
        }
    }
    Ok(())
}

impl LocalStore for SqliteStore {
    fn get(&self, key: &EntityKey) -> SyncResult<Option<EntitySnapshot>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT entity_type, entity_id, payload, revision, deleted, last_synced_at
                 FROM snapshots WHERE entity_type = ?1 AND entity_id = ?2",
                params![key.entity_type, key.entity_id],
                Self::parse_snapshot,
            )
            .optional()?)
    }

    fn scan_outbox(&self) -> SyncResult<Vec<Mutation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT {OUTBOX_COLUMNS} FROM outbox ORDER BY seq"))?;
        let rows = stmt.query_map([], Self::parse_mutation)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn get_mutation(&self, id: &str) -> SyncResult<Option<Mutation>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                &format!("SELECT {OUTBOX_COLUMNS} FROM outbox WHERE id = ?1"),
                params![id],
                Self::parse_mutation,
            )
            .optional()?)
    }

    fn conflicts(&self) -> SyncResult<Vec<ConflictRecord>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT record FROM conflicts ORDER BY detected_at, mutation_id")?;
        let raw = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.iter().map(|r| decode_json(r)).collect()
    }

    fn confirmation(&self, match_id: &str) -> SyncResult<Option<MatchConfirmation>> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT state FROM confirmations WHERE match_id = ?1",
                params![match_id],
                |row| row.get(0),
            )
            .optional()?;
        raw.as_deref().map(decode_json::<MatchConfirmation>).transpose()
    }

    fn cursor(&self) -> SyncResult<Cursor> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM sync_meta WHERE key = ?1",
                params![CURSOR_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.map(Cursor::new).unwrap_or_default())
    }

    fn commit(&self, batch: WriteBatch) -> SyncResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for op in batch.into_ops() {
            // Dropping the transaction on error rolls it back
            apply(&tx, op)?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// Run all pending migrations
fn migrate(conn: &mut Connection) -> SyncResult<()> {
    let version = get_version(conn)?;
    if version < 1 {
        migrate_v1(conn)?;
    }
    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> SyncResult<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version')",
        [],
        |row| row.get(0),
    )?;
    if !exists {
        return Ok(0);
    }
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?)
}

/// Migration to version 1: initial schema
fn migrate_v1(conn: &mut Connection) -> SyncResult<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS snapshots (
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            revision INTEGER NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            last_synced_at INTEGER NOT NULL,
            PRIMARY KEY (entity_type, entity_id)
        );
        CREATE TABLE IF NOT EXISTS outbox (
            id TEXT PRIMARY KEY,
            seq INTEGER NOT NULL UNIQUE,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            op TEXT NOT NULL,
            payload TEXT NOT NULL,
            base_revision INTEGER,
            author TEXT,
            client_timestamp INTEGER NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            next_attempt_at INTEGER NOT NULL DEFAULT 0,
            last_error TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_outbox_entity ON outbox(entity_type, entity_id);
        CREATE TABLE IF NOT EXISTS conflicts (
            mutation_id TEXT PRIMARY KEY,
            record TEXT NOT NULL,
            detected_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS confirmations (
            match_id TEXT PRIMARY KEY,
            state TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS sync_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        INSERT INTO schema_version (version) VALUES (1);",
    )?;
    tx.commit()?;
    Ok(())
}
