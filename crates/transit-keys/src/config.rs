//! Engine configuration.
//!
//! Settings come from the `[transit]` table of a TOML file, then from
//! environment overrides. Every field has a default, so a missing file or an
//! absent table yields [`TransitConfig::default`].
//!
//! ```toml
//! [transit]
//! lock_timeout_ms = 5000
//! auto_create = true
//! cache_capacity = 1024
//!
//! [transit.defaults]
//! key_type = "aes256-gcm96"
//! derived = false
//! kdf = "hkdf_sha256"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransitError};
use crate::policy::PolicyOptions;

/// Environment variable overriding [`TransitConfig::lock_timeout_ms`].
pub const ENV_LOCK_TIMEOUT_MS: &str = "TRANSIT_LOCK_TIMEOUT_MS";
/// Environment variable overriding [`TransitConfig::auto_create`].
pub const ENV_AUTO_CREATE: &str = "TRANSIT_AUTO_CREATE";

/// Tunables for a [`PolicyManager`](crate::manager::PolicyManager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitConfig {
    /// How long a lock acquisition may wait before failing with `Busy`.
    pub lock_timeout_ms: u64,
    /// Whether `encrypt` creates missing policies.
    pub auto_create: bool,
    /// Maximum cached policies; 0 disables the cache.
    pub cache_capacity: u64,
    /// Options applied to auto-created policies.
    pub defaults: PolicyOptions,
}

impl Default for TransitConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
            auto_create: true,
            cache_capacity: 1_024,
            defaults: PolicyOptions::default(),
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    transit: TransitConfig,
}

impl TransitConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Parse the `[transit]` table from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content)
            .map_err(|e| TransitError::invalid(format!("failed to parse config: {e}")))?;
        file.transit.defaults.validate()?;
        Ok(file.transit)
    }

    /// Load from `path`, falling back to defaults if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let config = Self::from_toml_str(&content)?;
                tracing::info!(path = %path.display(), "configuration loaded");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(TransitError::Internal(format!(
                "failed to read config {}: {e}",
                path.display()
            ))),
        }
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup(ENV_LOCK_TIMEOUT_MS) {
            self.lock_timeout_ms = raw.trim().parse().map_err(|_| {
                TransitError::invalid(format!("{ENV_LOCK_TIMEOUT_MS} must be an integer, got {raw:?}"))
            })?;
        }
        if let Some(raw) = lookup(ENV_AUTO_CREATE) {
            self.auto_create = raw.trim().parse().map_err(|_| {
                TransitError::invalid(format!("{ENV_AUTO_CREATE} must be true or false, got {raw:?}"))
            })?;
        }
        Ok(self)
    }
}
