//! v001 -- Initial schema creation.
//!
//! Creates one document table per logical table: `users`, `chats`,
//! `messages`, `message_index` and `encryption_keys`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users, keyed by handle
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    key TEXT PRIMARY KEY NOT NULL,   -- unique handle
    doc TEXT NOT NULL                -- JSON User
);

-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    key TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    doc TEXT NOT NULL                -- JSON Chat (participants, last message cache)
);

-- ----------------------------------------------------------------
-- Messages, keyed <chat_id>/<seq hex> so a prefix scan is the chat log
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    key TEXT PRIMARY KEY NOT NULL,
    doc TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS message_index (
    key TEXT PRIMARY KEY NOT NULL,   -- message UUID
    doc TEXT NOT NULL                -- JSON string: key in `messages`
);

-- ----------------------------------------------------------------
-- Per-chat encryption keys
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS encryption_keys (
    key TEXT PRIMARY KEY NOT NULL,   -- chat UUID
    doc TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
