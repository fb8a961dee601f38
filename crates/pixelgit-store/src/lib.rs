//! # pixelgit-store
//!
//! Conversation and message store for the PixelGit chat backend.
//!
//! A [`Store`] keeps users, one-to-one chats, their message logs and per-chat
//! encryption keys consistent as a unit: a chat exists at most once per
//! unordered pair of handles, renames and account deletions cascade to every
//! chat they touch, and each append refreshes the chat's last-message cache.
//! Persistence is injected through the [`Backend`] trait, with a SQLite and a
//! flat JSON file implementation provided.

pub mod backend;
pub mod constants;
pub mod credentials;
pub mod migrations;
pub mod models;

mod chats;
mod coordinator;
mod error;
mod keys;
mod locks;
mod messages;
mod store;
mod users;

pub use backend::{Backend, JsonFileBackend, SqliteBackend, Table, WriteBatch};
pub use error::{BackendError, ErrorKind, Result, StoreError};
pub use models::*;
pub use store::{Store, StoreConfig};
