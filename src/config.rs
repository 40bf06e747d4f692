use crate::backend::BackendSettings;
use crate::core::error::{Error, Result};
use crate::utils::{get_config_dir, get_data_dir};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Storage engine name (`textdir` or `memory`)
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Root of the textdir tree
    #[serde(default = "default_datadir")]
    pub datadir: PathBuf,
    /// Ceiling for acquiring the storage lock
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,
    #[serde(default = "default_lock_retry")]
    pub lock_retry_ms: u64,
    /// Row count of the address and port lookup tables
    #[serde(default = "default_hash_rows")]
    pub hash_rows: usize,
    /// Default tracing level when no `-v` flag is given
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Also write logs to `<state dir>/zonefw.log`
    #[serde(default)]
    pub log_to_file: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            datadir: default_datadir(),
            lock_timeout_secs: default_lock_timeout(),
            lock_retry_ms: default_lock_retry(),
            hash_rows: default_hash_rows(),
            log_level: default_log_level(),
            log_to_file: false,
        }
    }
}

impl AppConfig {
    /// Settings handed to the storage engine's `conf`.
    pub fn backend_settings(&self) -> BackendSettings {
        BackendSettings {
            root: self.datadir.clone(),
            lock_timeout: Duration::from_secs(self.lock_timeout_secs),
            lock_retry: Duration::from_millis(self.lock_retry_ms.max(1)),
        }
    }

    /// Rejects values no engine can work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if !crate::backend::registry::ENGINES.contains(&self.backend.as_str()) {
            return Err(Error::Config(format!(
                "unknown backend '{}' (known: {})",
                self.backend,
                crate::backend::registry::ENGINES.join(", ")
            )));
        }
        if self.hash_rows == 0 {
            return Err(Error::Config("hash_rows must be at least 1".into()));
        }
        if self.lock_timeout_secs > 3600 {
            return Err(Error::Config("lock_timeout_secs is capped at 3600".into()));
        }
        if !matches!(
            self.log_level.as_str(),
            "error" | "warn" | "info" | "debug" | "trace"
        ) {
            return Err(Error::Config(format!(
                "invalid log_level '{}'",
                self.log_level
            )));
        }
        Ok(())
    }
}

fn default_backend() -> String {
    "textdir".to_string()
}

fn default_datadir() -> PathBuf {
    get_data_dir().map_or_else(|| PathBuf::from("textdir"), |d| d.join("textdir"))
}

fn default_lock_timeout() -> u64 {
    10
}

fn default_lock_retry() -> u64 {
    250
}

fn default_hash_rows() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Default location of `config.json`
pub fn default_config_path() -> Option<PathBuf> {
    get_config_dir().map(|d| d.join("config.json"))
}

/// Saves the config using an atomic write pattern.
/// 1. Writes to a temporary file in the target directory.
/// 2. Sets restrictive permissions (0o600).
/// 3. Atomically renames to the target path.
///
/// # Errors
///
/// Returns an error if the directory can't be created or the write fails.
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(config)?;
    let dir = path
        .parent()
        .ok_or_else(|| Error::Config(format!("{} has no parent directory", path.display())))?;
    std::fs::create_dir_all(dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // Set permissions BEFORE any data is written
        temp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    temp.write_all(json.as_bytes())?;
    temp.as_file().sync_all()?; // Ensure data is flushed to physical media

    temp.persist(path).map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::StorageFull {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "Disk full: cannot save configuration. Free up space and try again.",
            ))
        } else {
            Error::Io(e.error)
        }
    })?;
    tracing::debug!("Saved configuration to {}", path.display());
    Ok(())
}

/// Loads the config from `path`, or returns defaults if the file is missing.
///
/// # Errors
///
/// A present but unreadable, malformed or invalid file is an error.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let json = match std::fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(AppConfig::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: AppConfig = serde_json::from_str(&json)?;
    config.validate()?;
    Ok(config)
}
