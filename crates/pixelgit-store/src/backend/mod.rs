//! Pluggable persistence.
//!
//! The store logic only ever talks to a [`Backend`]: point reads, ordered
//! prefix scans, and atomic write batches over a handful of logical tables.
//! Two implementations ship with the crate:
//!
//! - [`SqliteBackend`]: one SQLite table per logical table, each batch runs in
//!   a single transaction.
//! - [`JsonFileBackend`]: one JSON document per logical table on disk, each
//!   batch is journaled before it is applied.

mod json_file;
mod sqlite;

pub use json_file::JsonFileBackend;
pub use sqlite::SqliteBackend;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BackendError;

/// Logical tables.  Keys are plain strings; values are JSON documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// handle -> `User`
    Users,
    /// chat id -> `Chat`
    Chats,
    /// `<chat id>/<seq as 16 hex digits>` -> `Message`
    Messages,
    /// message id -> key in [`Table::Messages`]
    MessageIndex,
    /// chat id -> key string
    EncryptionKeys,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::Users,
        Table::Chats,
        Table::Messages,
        Table::MessageIndex,
        Table::EncryptionKeys,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Chats => "chats",
            Table::Messages => "messages",
            Table::MessageIndex => "message_index",
            Table::EncryptionKeys => "encryption_keys",
        }
    }
}

/// One mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Put { table: Table, key: String, doc: Value },
    Delete { table: Table, key: String },
}

/// Ordered set of mutations that a backend applies all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch {
    ops: Vec<Op>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an upsert of `record` under `key`.
    pub fn put<T: Serialize>(
        &mut self,
        table: Table,
        key: impl Into<String>,
        record: &T,
    ) -> Result<&mut Self, serde_json::Error> {
        let doc = serde_json::to_value(record)?;
        self.ops.push(Op::Put {
            table,
            key: key.into(),
            doc,
        });
        Ok(self)
    }

    /// Queue a removal.  Deleting a missing key is not an error.
    pub fn delete(&mut self, table: Table, key: impl Into<String>) -> &mut Self {
        self.ops.push(Op::Delete {
            table,
            key: key.into(),
        });
        self
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Storage capability consumed by [`Store`](crate::Store).
pub trait Backend: Send + Sync {
    /// Fetch one document.
    fn get(&self, table: Table, key: &str) -> Result<Option<Value>, BackendError>;

    /// All documents whose key starts with `prefix`, ascending by key.  An
    /// empty prefix scans the whole table.
    fn scan(&self, table: Table, prefix: &str) -> Result<Vec<(String, Value)>, BackendError>;

    /// Apply every operation of `batch`, or none of them.
    fn commit(&self, batch: WriteBatch) -> Result<(), BackendError>;
}
