//! Mission persistence using SQLite.
//!
//! Every transaction gets its own connection running `BEGIN IMMEDIATE`, so
//! a transaction handle owns everything it needs and can be bound to an
//! entity and handed between threads.

use super::{MissionRecord, StoreTransaction, TransactionalStore};
use crate::mission::ObjectId;
use crate::txn::TxnId;
use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Mission records in SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE missions (
///     object_id INTEGER PRIMARY KEY,   -- u64 stored bit-for-bit as i64
///     schema_version INTEGER NOT NULL,
///     record TEXT NOT NULL,            -- MissionRecord as JSON
///     updated_at TEXT NOT NULL         -- ISO 8601 timestamp
/// );
/// ```
pub struct SqliteStore {
    path: PathBuf,
    busy_timeout: Duration,
    next_txn: AtomicU64,
    /// Connection for reads outside transactions
    reader: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database and ensures the table exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn with_busy_timeout<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = open_connection(&path, busy_timeout)?;

        // WAL lets reads proceed while a transaction holds the write lock
        let _mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .context("Failed to enable WAL journal")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS missions (
                object_id INTEGER PRIMARY KEY,
                schema_version INTEGER NOT NULL,
                record TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )
        .context("Failed to create missions table")?;

        info!(path = %path.display(), "Mission store opened");

        Ok(Self {
            path,
            busy_timeout,
            next_txn: AtomicU64::new(1),
            reader: Mutex::new(conn),
        })
    }

    /// Load one mission record.
    pub fn load_mission(&self, object_id: ObjectId) -> Result<Option<MissionRecord>> {
        let conn = self.reader.lock();
        let json: Option<String> = conn
            .query_row(
                "SELECT record FROM missions WHERE object_id = ?1",
                params![object_id.0 as i64],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query mission")?;

        json.map(|json| {
            serde_json::from_str(&json)
                .with_context(|| format!("Corrupt record for mission {}", object_id))
        })
        .transpose()
    }

    /// Load every stored mission, ordered by object id.
    pub fn load_all_missions(&self) -> Result<Vec<MissionRecord>> {
        let conn = self.reader.lock();
        let mut stmt = conn
            .prepare("SELECT object_id, record FROM missions ORDER BY object_id")
            .context("Failed to prepare query")?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
            .context("Failed to execute query")?;

        let mut records = Vec::new();
        for row in rows {
            let (object_id, json) = row.context("Failed to read row")?;
            match serde_json::from_str::<MissionRecord>(&json) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(object_id = object_id as u64, error = %e, "Skipping corrupt mission record");
                }
            }
        }

        Ok(records)
    }

    /// Delete a mission record. Returns true if a row was removed.
    pub fn delete_mission(&self, object_id: ObjectId) -> Result<bool> {
        let removed = self
            .reader
            .lock()
            .execute(
                "DELETE FROM missions WHERE object_id = ?1",
                params![object_id.0 as i64],
            )
            .context("Failed to delete mission")?;
        Ok(removed > 0)
    }
}

impl TransactionalStore for SqliteStore {
    fn begin_transaction(&self) -> Result<Box<dyn StoreTransaction>> {
        let conn = open_connection(&self.path, self.busy_timeout)?;
        conn.execute_batch("BEGIN IMMEDIATE")
            .context("Failed to begin transaction")?;

        let id = TxnId(self.next_txn.fetch_add(1, Ordering::Relaxed));
        Ok(Box::new(SqliteTransaction {
            id,
            conn: Some(conn),
        }))
    }
}

fn open_connection(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open mission DB at {}", path.display()))?;
    conn.busy_timeout(busy_timeout)
        .context("Failed to set busy timeout")?;
    Ok(conn)
}

/// An open SQLite transaction on its own connection.
pub struct SqliteTransaction {
    id: TxnId,
    /// None once committed or rolled back
    conn: Option<Connection>,
}

impl SqliteTransaction {
    fn finish(&mut self, statement: &str) -> Result<()> {
        let conn = self
            .conn
            .take()
            .context("Transaction already finished")?;
        conn.execute_batch(statement)
            .with_context(|| format!("Failed to {} {}", statement.to_lowercase(), self.id))
    }
}

impl StoreTransaction for SqliteTransaction {
    fn id(&self) -> TxnId {
        self.id
    }

    fn put_mission(&mut self, record: &MissionRecord) -> Result<()> {
        let conn = self
            .conn
            .as_ref()
            .context("Transaction already finished")?;
        let json = serde_json::to_string(record).context("Failed to serialize mission record")?;

        conn.execute(
            r#"
            INSERT INTO missions (object_id, schema_version, record, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(object_id) DO UPDATE SET
                schema_version = excluded.schema_version,
                record = excluded.record,
                updated_at = excluded.updated_at
            "#,
            params![
                record.object_id.0 as i64,
                record.schema_version,
                json,
                Utc::now().to_rfc3339(),
            ],
        )
        .context("Failed to write mission record")?;

        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.finish("COMMIT")
    }

    fn rollback(mut self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK")
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                warn!(txn = %self.id, error = %e, "Failed to roll back abandoned transaction");
            }
        }
    }
}
