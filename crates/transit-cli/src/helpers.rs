//! Shared startup helpers for the CLI.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;
use transit_keys::{PolicyManager, TransitConfig};
use transit_store::SqliteStorage;

/// Initialize the tracing subscriber with the given default log level.
///
/// Logs go to stderr so stdout carries only JSON responses.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

/// Load `path` (missing file means defaults) and apply environment overrides.
pub fn load_config(path: &Path) -> Result<TransitConfig> {
    TransitConfig::load(path)
        .and_then(TransitConfig::with_env_overrides)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

/// Open the SQLite database at `db`, creating its directory, and build a
/// manager over it.
pub async fn open_manager(db: &Path, config: TransitConfig) -> Result<PolicyManager> {
    if let Some(dir) = db.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create data directory {}", dir.display()))?;
    }

    let storage = SqliteStorage::open(db.to_path_buf())
        .await
        .with_context(|| format!("failed to open database {}", db.display()))?;
    info!(path = %db.display(), "database opened");

    Ok(PolicyManager::new(Arc::new(storage), config))
}
