//! Identity operations: registration, login, directory and account mutation.

use chrono::Utc;
use uuid::Uuid;

use crate::backend::{Table, WriteBatch};
use crate::credentials::{hash_secret, verify_secret};
use crate::error::{Result, StoreError};
use crate::models::{Profile, User, UserSummary};
use crate::store::Store;

const MAX_HANDLE_CHARS: usize = 64;

/// Passes `delete_user` makes before giving up on a peer set that keeps
/// growing under it.
const MAX_DELETE_ATTEMPTS: usize = 8;

impl Store {
    /// Create an account.  Fails with `Conflict` when the handle is taken.
    pub fn register(&self, handle: &str, secret: &str, profile: Profile) -> Result<Uuid> {
        validate_handle(handle)?;
        if secret.is_empty() {
            return Err(StoreError::InvalidArgument("password is required".into()));
        }

        let _guard = self.lock_users([handle]);
        if self.find_user(handle)?.is_some() {
            return Err(StoreError::Conflict(format!("Username '{handle}' already exists")));
        }

        let user = User {
            id: Uuid::new_v4(),
            handle: handle.to_string(),
            credential_hash: hash_secret(secret)?,
            chat_refs: Vec::new(),
            avatar: Some(
                profile
                    .avatar
                    .filter(|a| !a.is_empty())
                    .unwrap_or_else(|| self.config().default_avatar.clone()),
            ),
            email: profile.email.filter(|e| !e.is_empty()),
            created_at: Utc::now(),
        };

        let mut batch = WriteBatch::new();
        batch.put(Table::Users, handle, &user)?;
        self.commit(batch)?;

        tracing::info!(handle = %handle, id = %user.id, "user registered");
        Ok(user.id)
    }

    /// Check a handle/secret pair and return the account id.
    pub fn authenticate(&self, handle: &str, secret: &str) -> Result<Uuid> {
        let user = self.require_user(handle)?;
        if !verify_secret(secret, &user.credential_hash)? {
            return Err(StoreError::Unauthorized("Invalid password".into()));
        }
        Ok(user.id)
    }

    /// Public profile of one user.
    pub fn get_user(&self, handle: &str) -> Result<UserSummary> {
        Ok(UserSummary::from(&self.require_user(handle)?))
    }

    /// Every user except `excluding`, ordered by handle.
    pub fn list_users(&self, excluding: Option<&str>) -> Result<Vec<UserSummary>> {
        Ok(self
            .load_all::<User>(Table::Users, "")?
            .iter()
            .filter(|user| Some(user.handle.as_str()) != excluding)
            .map(UserSummary::from)
            .collect())
    }

    /// Replace the credential after re-verifying the current one.
    pub fn update_credential(&self, handle: &str, current: &str, new_secret: &str) -> Result<()> {
        if new_secret.is_empty() {
            return Err(StoreError::InvalidArgument("new password is required".into()));
        }

        let _guard = self.lock_users([handle]);
        let mut user = self.require_user(handle)?;
        if !verify_secret(current, &user.credential_hash)? {
            return Err(StoreError::Forbidden("Invalid current password".into()));
        }

        user.credential_hash = hash_secret(new_secret)?;
        let mut batch = WriteBatch::new();
        batch.put(Table::Users, handle, &user)?;
        self.commit(batch)?;

        tracing::info!(handle = %handle, "password updated");
        Ok(())
    }

    /// Overwrite the profile fields that are `Some`.
    pub fn update_profile(&self, handle: &str, profile: Profile) -> Result<UserSummary> {
        let _guard = self.lock_users([handle]);
        let mut user = self.require_user(handle)?;

        if let Some(avatar) = profile.avatar {
            user.avatar = Some(avatar);
        }
        if let Some(email) = profile.email {
            user.email = Some(email);
        }

        let mut batch = WriteBatch::new();
        batch.put(Table::Users, handle, &user)?;
        self.commit(batch)?;
        Ok(UserSummary::from(&user))
    }

    /// Move an account to a new handle and rewrite every chat that
    /// references the old one, as one batch.
    pub fn rename_user(&self, old: &str, new: &str) -> Result<()> {
        validate_handle(new)?;
        if old == new {
            return Err(StoreError::InvalidArgument(
                "new username must differ from the current one".into(),
            ));
        }

        let _users = self.lock_users([old, new]);
        if self.find_user(new)?.is_some() {
            return Err(StoreError::Conflict(format!("Username '{new}' already exists")));
        }
        let user = self.require_user(old)?;

        // Holding the user lock freezes the set of chats naming `old`.
        let chats = self.chats_with_participant(old)?;
        let _chats = self.lock_chats(chats.iter().map(|c| c.id));

        let batch = self.rename_participant(user, new, chats.iter().map(|c| c.id))?;
        self.commit(batch)?;

        tracing::info!(old = %old, new = %new, chats = chats.len(), "user renamed");
        Ok(())
    }

    /// Delete an account after verifying its credential, cascading to every
    /// chat it took part in.
    pub fn delete_user(&self, handle: &str, secret: &str) -> Result<()> {
        // Id and hash the secret was last checked against.  A later pass only
        // re-runs the check if the account changed in between.
        let mut verified: Option<(Uuid, String)> = None;

        for _ in 0..MAX_DELETE_ATTEMPTS {
            // Peers' chat indexes change too, so their locks are needed.
            // Which peers is only known after reading, hence the retry.
            let peers = self.peers_of(handle)?;
            let _users = self.lock_users(peers.iter().map(String::as_str).chain([handle]));

            let user = self.require_user(handle)?;
            let unchanged = verified
                .as_ref()
                .is_some_and(|(id, hash)| *id == user.id && *hash == user.credential_hash);
            if !unchanged {
                if !verify_secret(secret, &user.credential_hash)? {
                    return Err(StoreError::Forbidden("Invalid password".into()));
                }
                verified = Some((user.id, user.credential_hash.clone()));
            }

            let chats = self.chats_with_participant(handle)?;
            let locked_all = chats
                .iter()
                .filter_map(|c| c.peer_of(handle))
                .all(|peer| peers.iter().any(|p| p == peer));
            if !locked_all {
                tracing::debug!(handle = %handle, "new peer appeared, retrying delete");
                continue;
            }

            let _chats = self.lock_chats(chats.iter().map(|c| c.id));
            let batch = self.purge_user(&user, chats.iter().map(|c| c.id))?;
            self.commit(batch)?;

            tracing::info!(handle = %handle, chats = chats.len(), "user deleted");
            return Ok(());
        }

        tracing::warn!(handle = %handle, attempts = MAX_DELETE_ATTEMPTS, "gave up deleting user");
        Err(StoreError::Conflict(format!(
            "User '{handle}' kept gaining chats during deletion, try again"
        )))
    }

    fn peers_of(&self, handle: &str) -> Result<Vec<String>> {
        Ok(self
            .chats_with_participant(handle)?
            .iter()
            .filter_map(|c| c.peer_of(handle).map(str::to_string))
            .collect())
    }
}

fn validate_handle(handle: &str) -> Result<()> {
    if handle.trim().is_empty() {
        return Err(StoreError::InvalidArgument("username is required".into()));
    }
    if handle.chars().count() > MAX_HANDLE_CHARS {
        return Err(StoreError::InvalidArgument(format!(
            "username longer than {MAX_HANDLE_CHARS} characters"
        )));
    }
    if handle.trim() != handle || handle.chars().any(char::is_control) {
        return Err(StoreError::InvalidArgument(
            "username contains surrounding whitespace or control characters".into(),
        ));
    }
    Ok(())
}
