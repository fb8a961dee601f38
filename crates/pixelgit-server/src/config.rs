//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use pixelgit_store::constants::MAX_ATTACHMENT_BYTES;
use serde::Serialize;

/// Which persistence backend the store runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Sqlite,
    Json,
}

impl std::str::FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StorageKind::Sqlite),
            "json" => Ok(StorageKind::Json),
            other => Err(format!("unknown storage backend '{other}'")),
        }
    }
}

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:5000`
    pub http_addr: SocketAddr,

    /// Env: `STORAGE_BACKEND` (`sqlite` or `json`)
    /// Default: `sqlite`
    pub storage: StorageKind,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: the platform data directory.
    pub database_path: Option<PathBuf>,

    /// Directory holding the JSON table files.
    /// Env: `DATA_DIR`
    /// Default: `./data`
    pub data_dir: PathBuf,

    /// Where the JSON backend keeps timestamped copies of rewritten tables.
    /// Env: `BACKUP_DIR`
    /// Default: unset (no backups).
    pub backup_dir: Option<PathBuf>,

    /// HMAC secret for session tokens.
    /// Env: `SECRET_KEY`
    /// Default: a fixed development value.
    pub secret_key: String,

    /// Env: `TOKEN_TTL_HOURS`
    /// Default: `24`
    pub token_ttl_hours: i64,

    /// Largest accepted attachment payload in bytes.
    /// Env: `MAX_ATTACHMENT_BYTES`
    /// Default: 4 MiB
    pub max_attachment_bytes: usize,
}

pub const DEV_SECRET_KEY: &str = "pixelgit-dev-secret";

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 5000).into(),
            storage: StorageKind::Sqlite,
            database_path: None,
            data_dir: PathBuf::from("./data"),
            backup_dir: None,
            secret_key: DEV_SECRET_KEY.to_string(),
            token_ttl_hours: 24,
            max_attachment_bytes: MAX_ATTACHMENT_BYTES,
        }
    }
}

// The secret stays out of logs.
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("storage", &self.storage)
            .field("database_path", &self.database_path)
            .field("data_dir", &self.data_dir)
            .field("backup_dir", &self.backup_dir)
            .field("secret_key", &"<redacted>")
            .field("token_ttl_hours", &self.token_ttl_hours)
            .field("max_attachment_bytes", &self.max_attachment_bytes)
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(kind) = var("STORAGE_BACKEND") {
            match kind.parse::<StorageKind>() {
                Ok(parsed) => config.storage = parsed,
                Err(e) => tracing::warn!(error = %e, "Invalid STORAGE_BACKEND, using sqlite"),
            }
        }

        if let Some(path) = var("DATABASE_PATH").filter(|p| !p.is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(dir) = var("DATA_DIR").filter(|d| !d.is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }

        if let Some(dir) = var("BACKUP_DIR").filter(|d| !d.is_empty()) {
            config.backup_dir = Some(PathBuf::from(dir));
        }

        match var("SECRET_KEY").filter(|k| !k.is_empty()) {
            Some(key) => config.secret_key = key,
            None => tracing::warn!("SECRET_KEY not set, using the development secret"),
        }

        if let Some(val) = var("TOKEN_TTL_HOURS") {
            match val.parse::<i64>() {
                Ok(hours) if hours > 0 => config.token_ttl_hours = hours,
                _ => tracing::warn!(value = %val, "Invalid TOKEN_TTL_HOURS, using default"),
            }
        }

        if let Some(val) = var("MAX_ATTACHMENT_BYTES") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_attachment_bytes = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_ATTACHMENT_BYTES, using default"),
            }
        }

        config
    }
}
