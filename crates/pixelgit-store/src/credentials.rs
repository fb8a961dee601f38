//! Password hashing with Argon2id.
//!
//! Hashes are PHC strings with a random 16-byte salt, safe to persist as-is.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::error::BackendError;

pub fn hash_secret(secret: &str) -> Result<String, BackendError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| BackendError::Credential(format!("hashing failed: {e}")))
}

/// `Ok(false)` on mismatch; `Err` only when the stored hash is unusable.
pub fn verify_secret(secret: &str, hash: &str) -> Result<bool, BackendError> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| BackendError::Credential(format!("invalid hash format: {e}")))?;

    match Argon2::default().verify_password(secret.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(BackendError::Credential(format!("verification failed: {e}"))),
    }
}
