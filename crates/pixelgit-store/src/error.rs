use thiserror::Error;

/// Faults raised by a storage backend.  These never describe a caller
/// mistake; they surface as [`ErrorKind::StorageUnavailable`].
#[derive(Error, Debug)]
pub enum BackendError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. writing a JSON table file).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored document could not be encoded or decoded.
    #[error("Document error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Password hashing failed or a stored hash is malformed.
    #[error("Credential hashing error: {0}")]
    Credential(String),
}

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Missing user, chat, message or key.
    #[error("{0} not found")]
    NotFound(String),

    /// Handle already taken.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Actor is not allowed to perform the operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Credential check failed on login.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Missing or malformed input.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Attachment over the configured ceiling.
    #[error("Attachment too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The backing store failed.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] BackendError),
}

/// Coarse classification used by the transport layer to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Forbidden,
    Unauthorized,
    InvalidArgument,
    PayloadTooLarge,
    StorageUnavailable,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::Conflict(_) => ErrorKind::Conflict,
            StoreError::Forbidden(_) => ErrorKind::Forbidden,
            StoreError::Unauthorized(_) => ErrorKind::Unauthorized,
            StoreError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            StoreError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            StoreError::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::StorageUnavailable(BackendError::Sqlite(e))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::StorageUnavailable(BackendError::Json(e))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
