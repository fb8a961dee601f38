use chrono::Utc;
use uuid::Uuid;

use crate::backend::{Table, WriteBatch};
use crate::error::{Result, StoreError};
use crate::models::{Message, NewMessage};
use crate::store::{message_key, message_prefix, Store};

impl Store {
    /// Append a message to a chat's log and refresh the chat's last-message
    /// cache.
    pub fn append_message(&self, chat_id: Uuid, sender: &str, body: NewMessage) -> Result<Message> {
        let text = body.text.filter(|t| !t.is_empty());
        let attachment = body.attachment.filter(|a| !a.data.is_empty());
        if text.is_none() && attachment.is_none() {
            return Err(StoreError::InvalidArgument(
                "Message needs text or an attachment".into(),
            ));
        }

        let _guard = self.lock_chat(chat_id);
        let mut chat = self.require_chat(chat_id)?;

        if !chat.has_participant(sender) {
            return Err(StoreError::Forbidden(format!(
                "User '{sender}' is not in chat {chat_id}"
            )));
        }

        if let Some(attachment) = &attachment {
            let max = self.config().max_attachment_bytes;
            if attachment.data.len() > max {
                return Err(StoreError::PayloadTooLarge {
                    size: attachment.data.len(),
                    max,
                });
            }
        }

        // Never earlier than the current tail, even if the clock steps back.
        let now = Utc::now();
        let timestamp = match chat.last_message_at {
            Some(tail) if tail > now => tail,
            _ => now,
        };

        let message = Message {
            id: Uuid::new_v4(),
            chat_id,
            seq: chat.next_seq,
            sender: sender.to_string(),
            text,
            attachment,
            timestamp,
        };
        chat.next_seq += 1;
        chat.touch_last_message(Some(self.summarize(&message)), Some(timestamp));

        let key = message_key(chat_id, message.seq);
        let mut batch = WriteBatch::new();
        batch.put(Table::Messages, key.as_str(), &message)?;
        batch.put(Table::MessageIndex, message.id.to_string(), &key)?;
        batch.put(Table::Chats, chat_id.to_string(), &chat)?;
        self.commit(batch)?;

        tracing::debug!(chat_id = %chat_id, message_id = %message.id, seq = message.seq, "message appended");
        Ok(message)
    }

    /// Messages of a chat, oldest first.
    ///
    /// `NotFound` when the chat does not exist; an empty list when it exists
    /// but has no messages.
    pub fn list_messages(&self, chat_id: Uuid) -> Result<Vec<Message>> {
        self.require_chat(chat_id)?;
        self.load_all(Table::Messages, &message_prefix(chat_id))
    }

    pub fn get_message(&self, message_id: Uuid) -> Result<Message> {
        self.find_message(message_id)?
            .ok_or_else(|| StoreError::NotFound(format!("Message {message_id}")))
    }

    /// Remove one message.  Missing messages are not an error.
    ///
    /// When the removed message was the newest one, the chat's cached
    /// summary is recomputed from the new tail (or cleared).
    pub fn delete_message(&self, message_id: Uuid) -> Result<()> {
        let Some(seen) = self.find_message(message_id)? else {
            return Ok(());
        };

        let _guard = self.lock_chat(seen.chat_id);
        let Some(message) = self.find_message(message_id)? else {
            return Ok(());
        };
        let chat_id = message.chat_id;

        let mut batch = WriteBatch::new();
        batch.delete(Table::Messages, message_key(chat_id, message.seq));
        batch.delete(Table::MessageIndex, message_id.to_string());

        if let Some(mut chat) = self.find_chat(chat_id)? {
            let remaining: Vec<Message> = self.load_all(Table::Messages, &message_prefix(chat_id))?;
            let newer_exists = remaining.iter().any(|m| m.seq > message.seq);
            if !newer_exists {
                let tail = remaining.iter().rev().find(|m| m.id != message_id);
                chat.touch_last_message(
                    tail.map(|m| self.summarize(m)),
                    tail.map(|m| m.timestamp),
                );
                batch.put(Table::Chats, chat_id.to_string(), &chat)?;
            }
        }

        self.commit(batch)?;
        tracing::debug!(chat_id = %chat_id, message_id = %message_id, "message deleted");
        Ok(())
    }

    fn find_message(&self, message_id: Uuid) -> Result<Option<Message>> {
        let Some(key) = self.load::<String>(Table::MessageIndex, &message_id.to_string())? else {
            return Ok(None);
        };
        self.load(Table::Messages, &key)
    }

    /// Chat-list preview: a fixed label for attachments, otherwise the text
    /// cut to the configured length.
    fn summarize(&self, message: &Message) -> String {
        if let Some(attachment) = &message.attachment {
            return attachment.kind.label().to_string();
        }
        let text = message.text.as_deref().unwrap_or_default();
        let limit = self.config().summary_chars;
        match text.char_indices().nth(limit) {
            Some((cut, _)) => format!("{}…", &text[..cut]),
            None => text.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MAX_ATTACHMENT_BYTES;
    use crate::error::ErrorKind;
    use crate::models::{Attachment, AttachmentKind};
    use crate::store::test_support::store_with_users;

    fn chat_between(store: &Store, a: &str, b: &str) -> Uuid {
        store.get_or_create_chat(a, b).unwrap().0
    }

    #[test]
    fn append_is_visible_in_order() {
        let store = store_with_users(&["alice", "bob"]);
        let chat = chat_between(&store, "alice", "bob");

        for (sender, text) in [("alice", "one"), ("bob", "two"), ("alice", "three")] {
            store
                .append_message(chat, sender, NewMessage::text(text))
                .unwrap();
        }

        let log = store.list_messages(chat).unwrap();
        let texts: Vec<&str> = log.iter().filter_map(|m| m.text.as_deref()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
        assert!(log.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(log.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[test]
    fn outsider_is_forbidden() {
        let store = store_with_users(&["alice", "bob", "mallory"]);
        let chat = chat_between(&store, "alice", "bob");
        let err = store
            .append_message(chat, "mallory", NewMessage::text("hi"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert!(store.list_messages(chat).unwrap().is_empty());
    }

    #[test]
    fn missing_chat_vs_empty_chat() {
        let store = store_with_users(&["alice", "bob"]);
        let chat = chat_between(&store, "alice", "bob");
        assert!(store.list_messages(chat).unwrap().is_empty());
        assert_eq!(
            store.list_messages(Uuid::new_v4()).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            store
                .append_message(Uuid::new_v4(), "alice", NewMessage::text("x"))
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn empty_body_is_invalid() {
        let store = store_with_users(&["alice", "bob"]);
        let chat = chat_between(&store, "alice", "bob");
        for body in [
            NewMessage::default(),
            NewMessage::text(""),
            NewMessage::attachment(AttachmentKind::Image, ""),
        ] {
            assert_eq!(
                store.append_message(chat, "alice", body).unwrap_err().kind(),
                ErrorKind::InvalidArgument
            );
        }
    }

    #[test]
    fn cache_tracks_the_newest_message() {
        let store = store_with_users(&["alice", "bob"]);
        let chat = chat_between(&store, "alice", "bob");

        let sent = store
            .append_message(chat, "alice", NewMessage::text("ciphertext"))
            .unwrap();
        let cached = store.get_chat(chat).unwrap();
        assert_eq!(cached.last_message.as_deref(), Some("ciphertext"));
        assert_eq!(cached.last_message_at, Some(sent.timestamp));

        let photo = store
            .append_message(chat, "bob", NewMessage::attachment(AttachmentKind::Image, "aGVsbG8="))
            .unwrap();
        let cached = store.get_chat(chat).unwrap();
        assert_eq!(cached.last_message.as_deref(), Some("📷 Photo"));
        assert_eq!(cached.last_message_at, Some(photo.timestamp));

        store
            .append_message(chat, "bob", NewMessage::attachment(AttachmentKind::Video, "AAAA"))
            .unwrap();
        assert_eq!(
            store.get_chat(chat).unwrap().last_message.as_deref(),
            Some("🎬 Video")
        );
    }

    #[test]
    fn long_text_preview_is_truncated() {
        let store = store_with_users(&["alice", "bob"]);
        let chat = chat_between(&store, "alice", "bob");
        let long = "é".repeat(500);
        store
            .append_message(chat, "alice", NewMessage::text(long.clone()))
            .unwrap();

        let preview = store.get_chat(chat).unwrap().last_message.unwrap();
        assert_eq!(preview.chars().count(), store.config().summary_chars + 1);
        assert!(preview.ends_with('…'));
        assert_eq!(
            store.list_messages(chat).unwrap()[0].text.as_deref(),
            Some(long.as_str())
        );
    }

    #[test]
    fn attachment_ceiling_is_inclusive() {
        let store = store_with_users(&["alice", "bob"]);
        let chat = chat_between(&store, "alice", "bob");

        let at_limit = "A".repeat(MAX_ATTACHMENT_BYTES);
        store
            .append_message(chat, "alice", NewMessage::attachment(AttachmentKind::File, at_limit))
            .unwrap();

        let over = "A".repeat(MAX_ATTACHMENT_BYTES + 1);
        let err = store
            .append_message(chat, "alice", NewMessage::attachment(AttachmentKind::File, over))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PayloadTooLarge);
        assert_eq!(store.list_messages(chat).unwrap().len(), 1);
    }

    #[test]
    fn text_with_attachment_keeps_both() {
        let store = store_with_users(&["alice", "bob"]);
        let chat = chat_between(&store, "alice", "bob");
        let sent = store
            .append_message(
                chat,
                "alice",
                NewMessage {
                    text: Some("caption".into()),
                    attachment: Some(Attachment {
                        kind: AttachmentKind::Image,
                        data: "AAAA".into(),
                    }),
                },
            )
            .unwrap();
        assert_eq!(store.get_message(sent.id).unwrap(), sent);
    }

    #[test]
    fn deleting_the_tail_recomputes_the_cache() {
        let store = store_with_users(&["alice", "bob"]);
        let chat = chat_between(&store, "alice", "bob");

        let first = store
            .append_message(chat, "alice", NewMessage::text("first"))
            .unwrap();
        let second = store
            .append_message(chat, "bob", NewMessage::text("second"))
            .unwrap();

        store.delete_message(second.id).unwrap();
        let cached = store.get_chat(chat).unwrap();
        assert_eq!(cached.last_message.as_deref(), Some("first"));
        assert_eq!(cached.last_message_at, Some(first.timestamp));

        store.delete_message(first.id).unwrap();
        let cached = store.get_chat(chat).unwrap();
        assert_eq!(cached.last_message, None);
        assert_eq!(cached.last_message_at, None);
        assert!(store.list_messages(chat).unwrap().is_empty());
    }

    #[test]
    fn deleting_an_older_message_keeps_the_cache() {
        let store = store_with_users(&["alice", "bob"]);
        let chat = chat_between(&store, "alice", "bob");

        let first = store
            .append_message(chat, "alice", NewMessage::text("first"))
            .unwrap();
        store
            .append_message(chat, "bob", NewMessage::text("second"))
            .unwrap();

        store.delete_message(first.id).unwrap();
        assert_eq!(
            store.get_chat(chat).unwrap().last_message.as_deref(),
            Some("second")
        );
        assert_eq!(store.list_messages(chat).unwrap().len(), 1);
    }

    #[test]
    fn delete_message_is_idempotent() {
        let store = store_with_users(&["alice", "bob"]);
        let chat = chat_between(&store, "alice", "bob");
        let sent = store
            .append_message(chat, "alice", NewMessage::text("bye"))
            .unwrap();

        store.delete_message(sent.id).unwrap();
        store.delete_message(sent.id).unwrap();
        store.delete_message(Uuid::new_v4()).unwrap();
        assert_eq!(
            store.get_message(sent.id).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}
