//! Durable [`Storage`] backend on a single SQLite file.
//!
//! All records live in one `entries` table. Each `put` is a single
//! `INSERT .. ON CONFLICT` statement, so a record is either fully replaced or
//! untouched. The schema version is kept in `PRAGMA user_version`; a file
//! written by a newer schema is refused rather than reinterpreted.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, trace};

use crate::error::{StoreError, StoreResult};
use crate::storage::{Storage, validate_key};

/// Schema version this build writes and understands.
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA_V1: &str = "
    CREATE TABLE IF NOT EXISTS entries (
        key        TEXT PRIMARY KEY,
        value      BLOB NOT NULL,
        updated_at INTEGER NOT NULL
    );
";

/// SQLite-backed key-value storage. Cheap to clone; clones share the
/// connection.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open (or create) the database file at `path` and bring its schema up
    /// to date.
    pub async fn open(path: impl AsRef<Path> + Send + 'static) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> StoreResult<Connection> {
            info!(path = %path.display(), "opening policy database");
            let conn = Connection::open(&path)?;
            // Readers keep going while a rotation commits.
            conn.pragma_update(None, "journal_mode", "WAL")?;
            prepare(&conn)?;
            Ok(conn)
        })
        .await??;
        Ok(Self::from_connection(conn))
    }

    /// Volatile database with the current schema.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        prepare(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// The `user_version` recorded in the file.
    pub async fn schema_version(&self) -> StoreResult<u32> {
        self.with_conn(read_schema_version).await
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::TaskJoin(format!("connection mutex poisoned: {e}")))?;
            f(&conn)
        })
        .await?
    }
}

/// Apply durability settings and create or upgrade the schema.
fn prepare(conn: &Connection) -> StoreResult<()> {
    // A `put` that returned must survive power loss: it may hold a new key.
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.pragma_update(None, "busy_timeout", 5_000_i32)?;

    let found = read_schema_version(conn)?;
    if found > SCHEMA_VERSION {
        return Err(StoreError::Migration {
            version: found,
            message: format!("database schema is newer than supported v{SCHEMA_VERSION}"),
        });
    }
    if found == SCHEMA_VERSION {
        debug!(version = found, "schema up to date");
        return Ok(());
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(SCHEMA_V1)
        .map_err(|e| StoreError::Migration {
            version: SCHEMA_VERSION,
            message: e.to_string(),
        })?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    info!(from = found, to = SCHEMA_VERSION, "schema migrated");
    Ok(())
}

fn read_schema_version(conn: &Connection) -> StoreResult<u32> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        validate_key(key)?;
        let key = key.to_string();
        self.with_conn(move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM entries WHERE key = ?1",
                    params![key],
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
    }

    async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        validate_key(key)?;
        let key = key.to_string();
        let value = value.to_vec();
        let len = value.len();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO entries (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                updated_at = excluded.updated_at",
                params![key, value, chrono::Utc::now().timestamp()],
            )?;
            Ok(())
        })
        .await?;
        trace!(len, "sqlite put");
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        validate_key(key)?;
        let key = key.to_string();
        self.with_conn(move |conn| {
            let rows = conn.execute("DELETE FROM entries WHERE key = ?1", params![key])?;
            Ok(rows > 0)
        })
        .await
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let prefix = prefix.to_string();
        self.with_conn(move |conn| {
            // substr() instead of LIKE so '%' and '_' in names stay literal.
            let mut stmt = conn.prepare(
                "SELECT key FROM entries
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key",
            )?;
            let keys = stmt
                .query_map(params![prefix], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(keys)
        })
        .await
    }
}
