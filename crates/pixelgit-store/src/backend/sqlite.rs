//! SQLite backend.
//!
//! [`SqliteBackend`] owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.  Every logical table is a
//! `(key, doc)` SQL table; documents are stored as JSON text.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::{Backend, Op, Table, WriteBatch};
use crate::error::BackendError;
use crate::migrations;

/// Relational backend over a single SQLite connection.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/pixelgit/pixelgit.db`
    /// - macOS:   `~/Library/Application Support/com.pixelgit.pixelgit/pixelgit.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\pixelgit\pixelgit\data\pixelgit.db`
    pub fn new() -> Result<Self, BackendError> {
        Self::open_at(&default_path()?)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self, BackendError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, BackendError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, BackendError> {
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.lock().path().map(PathBuf::from)
    }
}

/// Platform data directory location of `pixelgit.db`.
pub fn default_path() -> Result<PathBuf, BackendError> {
    let project_dirs =
        ProjectDirs::from("com", "pixelgit", "pixelgit").ok_or(BackendError::NoDataDir)?;
    Ok(project_dirs.data_dir().join("pixelgit.db"))
}

impl Backend for SqliteBackend {
    fn get(&self, table: Table, key: &str) -> Result<Option<Value>, BackendError> {
        let conn = self.conn.lock();
        let doc: Option<String> = conn
            .query_row(
                &format!("SELECT doc FROM {} WHERE key = ?1", table.name()),
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        match doc {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    fn scan(&self, table: Table, prefix: &str) -> Result<Vec<(String, Value)>, BackendError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT key, doc FROM {}
             WHERE substr(key, 1, length(?1)) = ?1
             ORDER BY key ASC",
            table.name()
        ))?;

        let rows = stmt.query_map(params![prefix], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut docs = Vec::new();
        for row in rows {
            let (key, text) = row?;
            docs.push((key, serde_json::from_str(&text)?));
        }
        Ok(docs)
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), BackendError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for op in batch.ops() {
            match op {
                Op::Put { table, key, doc } => {
                    tx.execute(
                        &format!(
                            "INSERT INTO {} (key, doc) VALUES (?1, ?2)
                             ON CONFLICT(key) DO UPDATE SET doc = excluded.doc",
                            table.name()
                        ),
                        params![key, doc.to_string()],
                    )?;
                }
                Op::Delete { table, key } => {
                    tx.execute(
                        &format!("DELETE FROM {} WHERE key = ?1", table.name()),
                        params![key],
                    )?;
                }
            }
        }
        // Dropping `tx` without commit rolls back, so an early `?` above
        // leaves the database untouched.
        tx.commit()?;

        tracing::trace!(ops = batch.len(), "committed batch");
        Ok(())
    }
}
