//! # pixelgit-server
//!
//! HTTP API for the PixelGit chat backend.
//!
//! This binary provides:
//! - **Accounts**: registration, login with session tokens, rename, password
//!   and avatar changes, account deletion
//! - **Chats**: one conversation per pair of users, with per-chat end-to-end
//!   key exchange
//! - **Messages**: text and attachment messages, listing and deletion
//!
//! All state lives in a `pixelgit-store` [`Store`] backed by SQLite or a
//! directory of JSON files.

mod api;
mod auth;
mod config;
mod error;

use std::sync::Arc;

use pixelgit_store::{Backend, JsonFileBackend, SqliteBackend, Store, StoreConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::{ServerConfig, StorageKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,pixelgit_server=debug")),
        )
        .init();

    info!("Starting PixelGit server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the store
    // -----------------------------------------------------------------------
    let backend = open_backend(&config)?;
    let store = Store::with_config(
        backend,
        StoreConfig {
            max_attachment_bytes: config.max_attachment_bytes,
            ..StoreConfig::default()
        },
    );

    let http_addr = config.http_addr;
    let app_state = AppState::new(store, config);

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

fn open_backend(config: &ServerConfig) -> anyhow::Result<Arc<dyn Backend>> {
    match config.storage {
        StorageKind::Sqlite => {
            let backend = match &config.database_path {
                Some(path) => SqliteBackend::open_at(path)?,
                None => SqliteBackend::new()?,
            };
            info!(path = ?backend.path(), "Using SQLite storage");
            Ok(Arc::new(backend))
        }
        StorageKind::Json => {
            let mut backend = JsonFileBackend::open(config.data_dir.clone())?;
            if let Some(dir) = &config.backup_dir {
                backend = backend.with_backups(dir.clone())?;
            }
            info!(dir = %backend.dir().display(), "Using JSON file storage");
            Ok(Arc::new(backend))
        }
    }
}
