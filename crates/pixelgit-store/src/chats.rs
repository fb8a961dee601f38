//! Conversation operations: pair-deduplicated creation, per-user listing,
//! cascading delete.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::backend::{Table, WriteBatch};
use crate::error::{Result, StoreError};
use crate::models::{Chat, ChatOrigin, ChatSummary, Message};
use crate::store::{message_key, message_prefix, Store};

impl Store {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Return the chat between `a` and `b`, creating it on first request.
    ///
    /// The pair is unordered: `(a, b)` and `(b, a)` name the same chat.
    pub fn get_or_create_chat(&self, a: &str, b: &str) -> Result<(Uuid, ChatOrigin)> {
        if a.is_empty() || b.is_empty() {
            return Err(StoreError::InvalidArgument("Both users are required".into()));
        }
        if a == b {
            return Err(StoreError::InvalidArgument(
                "A chat needs two distinct users".into(),
            ));
        }

        // Both user locks serialize racing creations for the same pair; the
        // second caller finds the first one's chat below.
        let _users = self.lock_users([a, b]);
        let mut user_a = self.require_user(a)?;
        let mut user_b = self.require_user(b)?;

        for chat_id in &user_a.chat_refs {
            if let Some(chat) = self.find_chat(*chat_id)? {
                if chat.is_between(a, b) {
                    tracing::debug!(chat_id = %chat.id, "chat already exists");
                    return Ok((chat.id, ChatOrigin::Existing));
                }
            }
        }

        let chat = Chat {
            id: Uuid::new_v4(),
            participants: [a.to_string(), b.to_string()],
            created_at: Utc::now(),
            last_message: None,
            last_message_at: None,
            next_seq: 0,
        };
        user_a.chat_refs.push(chat.id);
        user_b.chat_refs.push(chat.id);

        let mut batch = WriteBatch::new();
        batch.put(Table::Chats, chat.id.to_string(), &chat)?;
        batch.put(Table::Users, a, &user_a)?;
        batch.put(Table::Users, b, &user_b)?;
        self.commit(batch)?;

        tracing::info!(chat_id = %chat.id, a = %a, b = %b, "chat created");
        Ok((chat.id, ChatOrigin::Created))
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a chat record.
    pub fn get_chat(&self, chat_id: Uuid) -> Result<Chat> {
        self.require_chat(chat_id)
    }

    /// Chats of `handle`, most recently active first.
    ///
    /// `NotFound` when the user does not exist; an empty list when the user
    /// exists but has no chats.
    pub fn list_chats_for_user(&self, handle: &str) -> Result<Vec<ChatSummary>> {
        let user = self.require_user(handle)?;

        let mut rows = Vec::with_capacity(user.chat_refs.len());
        for chat_id in &user.chat_refs {
            let Some(chat) = self.find_chat(*chat_id)? else {
                tracing::warn!(chat_id = %chat_id, handle = %handle, "dangling chat reference");
                continue;
            };
            let Some(peer) = chat.peer_of(handle) else {
                tracing::warn!(chat_id = %chat_id, handle = %handle, "chat reference without membership");
                continue;
            };
            let peer_avatar = self.find_user(peer)?.and_then(|u| u.avatar);

            rows.push((
                chat.last_message_at.unwrap_or(chat.created_at),
                ChatSummary {
                    chat_id: chat.id,
                    peer_handle: peer.to_string(),
                    last_message: chat.last_message.clone(),
                    last_message_at: chat.last_message_at,
                    peer_avatar,
                },
            ));
        }

        rows.sort_by(|x, y| y.0.cmp(&x.0));
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a chat with its messages and key.  Deleting a chat that does
    /// not exist succeeds.
    pub fn delete_chat(&self, chat_id: Uuid) -> Result<()> {
        loop {
            let Some(seen) = self.find_chat(chat_id)? else {
                return Ok(());
            };

            let [a, b] = &seen.participants;
            let _users = self.lock_users([a.as_str(), b.as_str()]);
            let _chat = self.lock_chat(chat_id);

            let Some(chat) = self.find_chat(chat_id)? else {
                return Ok(());
            };
            if chat.participants != seen.participants {
                // Renamed while we were waiting for the locks.
                continue;
            }

            let mut batch = WriteBatch::new();
            for handle in &chat.participants {
                if let Some(mut user) = self.find_user(handle)? {
                    user.chat_refs.retain(|id| *id != chat_id);
                    batch.put(Table::Users, handle.as_str(), &user)?;
                }
            }
            self.queue_chat_removal(chat_id, &mut batch)?;
            self.commit(batch)?;

            tracing::info!(chat_id = %chat_id, "chat deleted");
            return Ok(());
        }
    }

    /// Queue removal of a chat record, its messages, their index entries
    /// and its key.  Caller holds the chat lock.
    pub(crate) fn queue_chat_removal(&self, chat_id: Uuid, batch: &mut WriteBatch) -> Result<()> {
        for message in self.load_all::<Message>(Table::Messages, &message_prefix(chat_id))? {
            batch.delete(Table::MessageIndex, message.id.to_string());
            batch.delete(Table::Messages, message_key(chat_id, message.seq));
        }
        batch.delete(Table::EncryptionKeys, chat_id.to_string());
        batch.delete(Table::Chats, chat_id.to_string());
        Ok(())
    }
}

impl Chat {
    /// Refresh the cached last-message fields.  Only the message log calls
    /// this, on append and on delete of the tail.
    pub(crate) fn touch_last_message(&mut self, summary: Option<String>, at: Option<DateTime<Utc>>) {
        self.last_message = summary;
        self.last_message_at = at;
    }
}
