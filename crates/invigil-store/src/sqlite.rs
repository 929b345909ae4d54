//! SQLite-based store implementation

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::traits::child_segment;
use crate::{ChangeNotice, Store, StoreError, StoreResult, Versioned};

const NOTICE_CAPACITY: usize = 256;

/// SQLite-based store
///
/// Change notices cover writes made through this handle only.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    notices: broadcast::Sender<ChangeNotice>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let store = Self {
            conn: Mutex::new(conn),
            notices,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Documents keyed by full path
            CREATE TABLE IF NOT EXISTS documents (
                path TEXT PRIMARY KEY,
                revision INTEGER NOT NULL,
                value_json TEXT NOT NULL
            );

            -- Store-wide revision counter (single row)
            CREATE TABLE IF NOT EXISTS revision_counter (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                value INTEGER NOT NULL
            );

            INSERT OR IGNORE INTO revision_counter (id, value) VALUES (1, 0);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("store lock poisoned".into()))
    }

    fn notify(&self, path: &str, revision: Option<u64>) {
        let _ = self.notices.send(ChangeNotice {
            path: path.to_string(),
            revision,
        });
    }
}

fn current_revision(tx: &Transaction<'_>, path: &str) -> StoreResult<Option<u64>> {
    let revision: Option<i64> = tx
        .query_row(
            "SELECT revision FROM documents WHERE path = ?",
            [path],
            |row| row.get(0),
        )
        .optional()?;
    Ok(revision.map(|r| r as u64))
}

fn write_document(tx: &Transaction<'_>, path: &str, value: &Value) -> StoreResult<u64> {
    tx.execute("UPDATE revision_counter SET value = value + 1 WHERE id = 1", [])?;
    let revision: i64 =
        tx.query_row("SELECT value FROM revision_counter WHERE id = 1", [], |row| row.get(0))?;
    let json = serde_json::to_string(value)?;

    tx.execute(
        r#"
        INSERT INTO documents (path, revision, value_json)
        VALUES (?, ?, ?)
        ON CONFLICT(path)
        DO UPDATE SET revision = excluded.revision, value_json = excluded.value_json
        "#,
        params![path, revision, json],
    )?;

    Ok(revision as u64)
}

#[async_trait]
impl Store for SqliteStore {
    async fn get(&self, path: &str) -> StoreResult<Option<Versioned>> {
        let conn = self.conn()?;

        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT revision, value_json FROM documents WHERE path = ?",
                [path],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((revision, json)) => Ok(Some(Versioned {
                revision: revision as u64,
                value: serde_json::from_str(&json)?,
            })),
            None => Ok(None),
        }
    }

    async fn set(&self, path: &str, value: Value) -> StoreResult<u64> {
        let revision = {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            let revision = write_document(&tx, path, &value)?;
            tx.commit()?;
            revision
        };

        debug!(path, revision, "Document written");
        self.notify(path, Some(revision));
        Ok(revision)
    }

    async fn put_if(&self, path: &str, expected: Option<u64>, value: Value) -> StoreResult<u64> {
        let revision = {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            let actual = current_revision(&tx, path)?;

            match (expected, actual) {
                (None, Some(_)) => return Err(StoreError::AlreadyExists(path.to_string())),
                (None, None) => {}
                (Some(e), Some(a)) if e == a => {}
                (Some(_), _) => {
                    return Err(StoreError::RevisionMismatch {
                        path: path.to_string(),
                        expected,
                        actual,
                    });
                }
            }

            let revision = write_document(&tx, path, &value)?;
            tx.commit()?;
            revision
        };

        debug!(path, revision, "Document conditionally written");
        self.notify(path, Some(revision));
        Ok(revision)
    }

    async fn remove(&self, path: &str) -> StoreResult<bool> {
        let removed = {
            let conn = self.conn()?;
            conn.execute("DELETE FROM documents WHERE path = ?", [path])? > 0
        };

        if removed {
            self.notify(path, None);
        }
        Ok(removed)
    }

    async fn list(&self, path: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn()?;

        // '0' sorts directly after '/', bounding the subtree
        let lower = format!("{}/", path);
        let upper = format!("{}0", path);

        let mut stmt =
            conn.prepare("SELECT path FROM documents WHERE path > ? AND path < ? ORDER BY path")?;
        let rows = stmt.query_map(params![lower, upper], |row| row.get::<_, String>(0))?;

        let mut children = BTreeSet::new();
        for row in rows {
            let full = row?;
            if let Some(segment) = child_segment(path, &full) {
                children.insert(segment.to_string());
            }
        }

        Ok(children.into_iter().collect())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<ChangeNotice>> {
        Some(self.notices.subscribe())
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}
