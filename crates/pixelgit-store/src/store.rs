//! The [`Store`] handle.
//!
//! `Store` owns an injected [`Backend`] plus the per-key lock tables.  The
//! typed operations live next to their domain: identity in `users.rs`,
//! conversations in `chats.rs`, the message log in `messages.rs`, keys in
//! `keys.rs` and the cross-record cascades in `coordinator.rs`.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::backend::{Backend, Table, WriteBatch};
use crate::constants::{DEFAULT_AVATAR, MAX_ATTACHMENT_BYTES, MAX_SUMMARY_CHARS};
use crate::error::{Result, StoreError};
use crate::locks::{KeyGuard, KeyedLocks};
use crate::models::{Chat, User};

/// Store-side policy knobs.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Largest accepted attachment payload, inclusive.
    pub max_attachment_bytes: usize,
    /// Characters of message text kept as the chat's last-message preview.
    pub summary_chars: usize,
    /// Avatar assigned when registration does not supply one.
    pub default_avatar: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_attachment_bytes: MAX_ATTACHMENT_BYTES,
            summary_chars: MAX_SUMMARY_CHARS,
            default_avatar: DEFAULT_AVATAR.to_string(),
        }
    }
}

/// Users, chats, messages and keys kept consistent as one unit.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct Store {
    backend: Arc<dyn Backend>,
    config: StoreConfig,
    user_locks: KeyedLocks,
    chat_locks: KeyedLocks,
}

impl Store {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::with_config(backend, StoreConfig::default())
    }

    pub fn with_config(backend: Arc<dyn Backend>, config: StoreConfig) -> Self {
        Self {
            backend,
            config,
            user_locks: KeyedLocks::new(),
            chat_locks: KeyedLocks::new(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Typed backend access
    // ------------------------------------------------------------------

    pub(crate) fn load<T: DeserializeOwned>(&self, table: Table, key: &str) -> Result<Option<T>> {
        match self.backend.get(table, key)? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn load_all<T: DeserializeOwned>(&self, table: Table, prefix: &str) -> Result<Vec<T>> {
        self.backend
            .scan(table, prefix)?
            .into_iter()
            .map(|(_, doc)| serde_json::from_value(doc).map_err(StoreError::from))
            .collect()
    }

    pub(crate) fn commit(&self, batch: WriteBatch) -> Result<()> {
        self.backend.commit(batch)?;
        Ok(())
    }

    pub(crate) fn find_user(&self, handle: &str) -> Result<Option<User>> {
        self.load(Table::Users, handle)
    }

    pub(crate) fn require_user(&self, handle: &str) -> Result<User> {
        self.find_user(handle)?
            .ok_or_else(|| StoreError::NotFound(format!("User '{handle}'")))
    }

    pub(crate) fn find_chat(&self, chat_id: Uuid) -> Result<Option<Chat>> {
        self.load(Table::Chats, &chat_id.to_string())
    }

    pub(crate) fn require_chat(&self, chat_id: Uuid) -> Result<Chat> {
        self.find_chat(chat_id)?
            .ok_or_else(|| StoreError::NotFound(format!("Chat {chat_id}")))
    }

    /// Every chat that lists `handle` as a participant, from the chat table
    /// itself rather than the per-user index.
    pub(crate) fn chats_with_participant(&self, handle: &str) -> Result<Vec<Chat>> {
        Ok(self
            .load_all::<Chat>(Table::Chats, "")?
            .into_iter()
            .filter(|chat| chat.has_participant(handle))
            .collect())
    }

    // ------------------------------------------------------------------
    // Locking (users strictly before chats)
    // ------------------------------------------------------------------

    pub(crate) fn lock_users<'a>(&self, handles: impl IntoIterator<Item = &'a str>) -> Vec<KeyGuard> {
        self.user_locks.lock_all(handles)
    }

    pub(crate) fn lock_chat(&self, chat_id: Uuid) -> KeyGuard {
        self.chat_locks.lock(&chat_id.to_string())
    }

    pub(crate) fn lock_chats(&self, chat_ids: impl IntoIterator<Item = Uuid>) -> Vec<KeyGuard> {
        self.chat_locks
            .lock_all(chat_ids.into_iter().map(|id| id.to_string()))
    }
}

/// Key of a message inside [`Table::Messages`].  Zero-padded hex keeps the
/// key order equal to append order.
pub(crate) fn message_key(chat_id: Uuid, seq: u64) -> String {
    format!("{chat_id}/{seq:016x}")
}

/// Scan prefix covering every message of a chat.
pub(crate) fn message_prefix(chat_id: Uuid) -> String {
    format!("{chat_id}/")
}
