//! Flat-file backend: one pretty-printed JSON object per logical table.
//!
//! ```text
//! data/
//!   users.json            { "<handle>": { ...User } }
//!   chats.json            { "<chat id>": { ...Chat } }
//!   messages.json         { "<chat id>/<seq>": { ...Message } }
//!   message_index.json    { "<message id>": "<chat id>/<seq>" }
//!   encryption_keys.json  { "<chat id>": "<key>" }
//!   journal.json          pending batch, only present mid-commit
//! ```
//!
//! A commit first writes the batch to `journal.json`, then rewrites every
//! touched table file (write-to-temp + rename), then removes the journal.  A
//! journal found on open means a previous commit was interrupted; it is
//! replayed before the backend serves any request.
//!
//! When a table file fails to write, the files already rewritten are put back
//! to their previous contents and the journal is removed, so the failed batch
//! leaves no trace. If putting a file back also fails, the directory is
//! half-written and the journal is kept, so the next `open` rolls the batch
//! forward. The caller was told that batch failed; after such a restart its
//! writes are visible anyway.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;

use super::{Backend, Op, Table, WriteBatch};
use crate::error::BackendError;

type Documents = BTreeMap<String, Value>;

const JOURNAL_FILE: &str = "journal.json";

pub struct JsonFileBackend {
    dir: PathBuf,
    backup_dir: Option<PathBuf>,
    tables: Mutex<HashMap<Table, Documents>>,
}

impl JsonFileBackend {
    /// Open (or create) a data directory, replaying any interrupted commit.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut tables = HashMap::new();
        for table in Table::ALL {
            tables.insert(table, load_table(&table_path(&dir, table))?);
        }

        let backend = Self {
            dir,
            backup_dir: None,
            tables: Mutex::new(tables),
        };
        backend.recover()?;

        tracing::info!(dir = %backend.dir.display(), "opened JSON data directory");
        Ok(backend)
    }

    /// Copy every rewritten table file into `dir`, prefixed with a timestamp.
    pub fn with_backups(mut self, dir: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        self.backup_dir = Some(dir);
        Ok(self)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    fn recover(&self) -> Result<(), BackendError> {
        let journal = self.journal_path();
        if !journal.exists() {
            return Ok(());
        }

        let batch: WriteBatch = serde_json::from_slice(&std::fs::read(&journal)?)?;
        tracing::warn!(ops = batch.len(), "replaying interrupted commit from journal");

        let mut tables = self.tables.lock();
        let staged = stage(&tables, &batch);
        for (table, docs) in &staged {
            write_atomic(&table_path(&self.dir, *table), docs)?;
        }
        tables.extend(staged);
        std::fs::remove_file(&journal)?;
        Ok(())
    }

    fn persist(&self, table: Table, docs: &Documents) -> Result<(), BackendError> {
        let path = table_path(&self.dir, table);
        write_atomic(&path, docs)?;

        if let Some(backup_dir) = &self.backup_dir {
            let name = format!(
                "{}_{}.json",
                Utc::now().format("%Y%m%d_%H%M%S"),
                table.name()
            );
            if let Err(e) = std::fs::copy(&path, backup_dir.join(name)) {
                tracing::warn!(error = %e, table = table.name(), "backup copy failed");
            }
        }
        Ok(())
    }
}

impl Backend for JsonFileBackend {
    fn get(&self, table: Table, key: &str) -> Result<Option<Value>, BackendError> {
        Ok(self
            .tables
            .lock()
            .get(&table)
            .and_then(|docs| docs.get(key))
            .cloned())
    }

    fn scan(&self, table: Table, prefix: &str) -> Result<Vec<(String, Value)>, BackendError> {
        let tables = self.tables.lock();
        let Some(docs) = tables.get(&table) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, doc)| (key.clone(), doc.clone()))
            .collect())
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), BackendError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tables = self.tables.lock();

        // Intent first: a crash from here on is repaired by `recover`.
        let journal = self.journal_path();
        let tmp = journal.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(&batch)?)?;
        std::fs::rename(&tmp, &journal)?;

        let staged = stage(&tables, &batch);
        let mut written = Vec::new();
        for (table, docs) in &staged {
            if let Err(e) = self.persist(*table, docs) {
                // Put back what was already rewritten; the journal stays on
                // disk unless every file is restored.
                let restored = written.iter().all(|t: &Table| {
                    let original = tables.get(t).cloned().unwrap_or_default();
                    write_atomic(&table_path(&self.dir, *t), &original).is_ok()
                });
                if restored {
                    let _ = std::fs::remove_file(&journal);
                    tracing::error!(error = %e, table = table.name(), "commit failed, rolled back");
                } else {
                    tracing::error!(
                        error = %e,
                        table = table.name(),
                        journal = %journal.display(),
                        "commit failed and rollback failed; the journal will be replayed on next open"
                    );
                }
                return Err(e);
            }
            written.push(*table);
        }

        tables.extend(staged);
        std::fs::remove_file(&journal)?;
        Ok(())
    }
}

/// Apply `batch` to copies of the tables it touches.
fn stage(tables: &HashMap<Table, Documents>, batch: &WriteBatch) -> BTreeMap<Table, Documents> {
    let mut staged: BTreeMap<Table, Documents> = BTreeMap::new();
    for op in batch.ops() {
        let table = match op {
            Op::Put { table, .. } | Op::Delete { table, .. } => *table,
        };
        let docs = staged
            .entry(table)
            .or_insert_with(|| tables.get(&table).cloned().unwrap_or_default());
        match op {
            Op::Put { key, doc, .. } => {
                docs.insert(key.clone(), doc.clone());
            }
            Op::Delete { key, .. } => {
                docs.remove(key);
            }
        }
    }
    staged
}

fn table_path(dir: &Path, table: Table) -> PathBuf {
    dir.join(format!("{}.json", table.name()))
}

fn load_table(path: &Path) -> Result<Documents, BackendError> {
    if !path.exists() {
        return Ok(Documents::new());
    }
    let bytes = std::fs::read(path)?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Documents::new());
    }
    Ok(serde_json::from_slice(&bytes)?)
}

fn write_atomic(path: &Path, docs: &Documents) -> Result<(), BackendError> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(docs)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
