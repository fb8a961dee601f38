//! Per-chat end-to-end encryption keys.  The store never interprets them.

use uuid::Uuid;

use crate::backend::{Table, WriteBatch};
use crate::error::{Result, StoreError};
use crate::store::Store;

impl Store {
    /// The key stored for a chat.  `NotFound` if none was ever set.
    pub fn get_key(&self, chat_id: Uuid) -> Result<String> {
        self.load(Table::EncryptionKeys, &chat_id.to_string())?
            .ok_or_else(|| StoreError::NotFound(format!("Key for chat {chat_id}")))
    }

    /// Insert or overwrite the key of an existing chat.
    pub fn set_key(&self, chat_id: Uuid, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(StoreError::InvalidArgument("Key is required".into()));
        }

        // Same lock as delete_chat, so a key cannot outlive its chat.
        let _guard = self.lock_chat(chat_id);
        self.require_chat(chat_id)?;

        let mut batch = WriteBatch::new();
        batch.put(Table::EncryptionKeys, chat_id.to_string(), &key)?;
        self.commit(batch)?;

        tracing::debug!(chat_id = %chat_id, "encryption key saved");
        Ok(())
    }
}
