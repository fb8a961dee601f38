//! Domain model structs persisted by the storage backends.
//!
//! Every record derives `Serialize` and `Deserialize`: backends store them as
//! JSON documents and the server hands the public views straight to clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered account, keyed by its handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Immutable identifier assigned at registration.
    pub id: Uuid,
    /// Unique, renameable username.
    pub handle: String,
    /// Argon2id PHC string.  Never leaves the store.
    pub credential_hash: String,
    /// Secondary index of the chats this user takes part in.
    #[serde(default)]
    pub chat_refs: Vec<Uuid>,
    pub avatar: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Public view of a user, as returned by directory listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSummary {
    pub id: Uuid,
    pub handle: String,
    pub avatar: Option<String>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            handle: user.handle.clone(),
            avatar: user.avatar.clone(),
        }
    }
}

/// Optional profile fields supplied at registration or by a profile update.
/// `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub avatar: Option<String>,
    pub email: Option<String>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A one-to-one conversation.  Identity is the unordered participant pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: Uuid,
    /// Two distinct handles, in creation order.
    pub participants: [String; 2],
    pub created_at: DateTime<Utc>,
    /// Cached summary of the newest message.
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    /// Sequence number handed to the next appended message.
    #[serde(default)]
    pub next_seq: u64,
}

impl Chat {
    pub fn has_participant(&self, handle: &str) -> bool {
        self.participants.iter().any(|p| p == handle)
    }

    /// The other participant, if `handle` is one of the two.
    pub fn peer_of(&self, handle: &str) -> Option<&str> {
        match &self.participants {
            [a, b] if a == handle => Some(b),
            [a, b] if b == handle => Some(a),
            _ => None,
        }
    }

    /// True when this chat is between exactly `a` and `b`, in either order.
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        let [x, y] = &self.participants;
        (x == a && y == b) || (x == b && y == a)
    }
}

/// Whether [`get_or_create_chat`](crate::Store::get_or_create_chat) found an
/// existing chat or made a new one.  Both are successes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatOrigin {
    Created,
    Existing,
}

/// Row of a user's chat list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatSummary {
    pub chat_id: Uuid,
    pub peer_handle: String,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub peer_avatar: Option<String>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
    File,
}

impl AttachmentKind {
    /// Fixed chat-list label, so listings never decode attachment bytes.
    pub fn label(self) -> &'static str {
        match self {
            AttachmentKind::Image => "📷 Photo",
            AttachmentKind::Video => "🎬 Video",
            AttachmentKind::File => "📎 File",
        }
    }
}

impl std::str::FromStr for AttachmentKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "image" => Ok(AttachmentKind::Image),
            "video" => Ok(AttachmentKind::Video),
            "file" => Ok(AttachmentKind::File),
            other => Err(format!("unknown attachment kind: {other}")),
        }
    }
}

/// Attachment payload.  `data` is the client's encoded (base64 / ciphertext)
/// form and is stored opaquely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub data: String,
}

/// Body of a message about to be appended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewMessage {
    pub text: Option<String>,
    pub attachment: Option<Attachment>,
}

impl NewMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            attachment: None,
        }
    }

    pub fn attachment(kind: AttachmentKind, data: impl Into<String>) -> Self {
        Self {
            text: None,
            attachment: Some(Attachment {
                kind,
                data: data.into(),
            }),
        }
    }
}

/// A stored chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    /// Position in the chat's log; breaks timestamp ties.
    pub seq: u64,
    pub sender: String,
    pub text: Option<String>,
    pub attachment: Option<Attachment>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(a: &str, b: &str) -> Chat {
        Chat {
            id: Uuid::new_v4(),
            participants: [a.to_string(), b.to_string()],
            created_at: Utc::now(),
            last_message: None,
            last_message_at: None,
            next_seq: 0,
        }
    }

    #[test]
    fn pair_identity_ignores_order() {
        let c = chat("alice", "bob");
        assert!(c.is_between("alice", "bob"));
        assert!(c.is_between("bob", "alice"));
        assert!(!c.is_between("alice", "carol"));
    }

    #[test]
    fn peer_lookup() {
        let c = chat("alice", "bob");
        assert_eq!(c.peer_of("alice"), Some("bob"));
        assert_eq!(c.peer_of("bob"), Some("alice"));
        assert_eq!(c.peer_of("carol"), None);
    }

    #[test]
    fn attachment_kind_parses_wire_names() {
        assert_eq!("image".parse::<AttachmentKind>(), Ok(AttachmentKind::Image));
        assert_eq!("video".parse::<AttachmentKind>(), Ok(AttachmentKind::Video));
        assert!("gif".parse::<AttachmentKind>().is_err());
    }
}
