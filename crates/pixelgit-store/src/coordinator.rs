//! Cross-record cascades triggered by identity changes.
//!
//! Both functions only build a [`WriteBatch`]; the caller commits it while
//! holding the user locks and the locks of every listed chat, so the backend
//! applies the whole cascade or nothing.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::backend::{Table, WriteBatch};
use crate::error::Result;
use crate::models::User;
use crate::store::Store;

impl Store {
    /// Move `user` to `new_handle` and replace the old handle in every listed
    /// chat.  Message senders keep the handle they had when they wrote.
    pub(crate) fn rename_participant(
        &self,
        mut user: User,
        new_handle: &str,
        chat_ids: impl IntoIterator<Item = Uuid>,
    ) -> Result<WriteBatch> {
        let old_handle = std::mem::replace(&mut user.handle, new_handle.to_string());

        let mut batch = WriteBatch::new();
        batch.delete(Table::Users, old_handle.as_str());
        batch.put(Table::Users, new_handle, &user)?;

        for chat_id in chat_ids {
            // Re-read under the chat lock: appends may have moved the cache.
            let Some(mut chat) = self.find_chat(chat_id)? else {
                continue;
            };
            for participant in chat.participants.iter_mut() {
                if *participant == old_handle {
                    *participant = new_handle.to_string();
                }
            }
            batch.put(Table::Chats, chat_id.to_string(), &chat)?;
        }

        Ok(batch)
    }

    /// Remove `user`, every listed chat with its messages and key, and those
    /// chats from the peers' indexes.
    pub(crate) fn purge_user(
        &self,
        user: &User,
        chat_ids: impl IntoIterator<Item = Uuid>,
    ) -> Result<WriteBatch> {
        let mut batch = WriteBatch::new();
        let mut peers: BTreeMap<String, User> = BTreeMap::new();

        for chat_id in chat_ids {
            let Some(chat) = self.find_chat(chat_id)? else {
                continue;
            };
            if let Some(peer) = chat.peer_of(&user.handle) {
                if !peers.contains_key(peer) {
                    if let Some(record) = self.find_user(peer)? {
                        peers.insert(peer.to_string(), record);
                    }
                }
                if let Some(record) = peers.get_mut(peer) {
                    record.chat_refs.retain(|id| *id != chat_id);
                }
            }
            self.queue_chat_removal(chat_id, &mut batch)?;
        }

        for (handle, record) in &peers {
            batch.put(Table::Users, handle.as_str(), record)?;
        }
        batch.delete(Table::Users, user.handle.as_str());
        Ok(batch)
    }
}
