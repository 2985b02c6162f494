//! Repository configuration helpers.
//!
//! `repo.json` doubles as the repository marker: a directory is a repository
//! exactly when it holds a config that loads and validates.
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file name at the repository root.
pub const CONFIG_FILE: &str = "repo.json";
/// Schema version of `repo.json` itself.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;
/// On-disk layout version of `jobs/`.
pub const FORMAT_VERSION: &str = "1";

const DEFAULT_LOCK_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_STALE_LOCK_AFTER_MS: u64 = 60 * 60 * 1000;

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

fn default_stale_lock_after_ms() -> u64 {
    DEFAULT_STALE_LOCK_AFTER_MS
}

/// Per-repository settings persisted in `repo.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub schema_version: u32,
    pub format_version: String,
    /// How long a commit waits for the repository lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Age after which a held lock is reported as stale instead of busy.
    #[serde(default = "default_stale_lock_after_ms")]
    pub stale_lock_after_ms: u64,
    /// Worker threads for content hashing; 0 uses the shared pool.
    #[serde(default)]
    pub hash_threads: usize,
}

impl RepoConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn stale_lock_after(&self) -> Duration {
        Duration::from_millis(self.stale_lock_after_ms)
    }
}

/// Config written by `init`.
pub fn default_config() -> RepoConfig {
    RepoConfig {
        schema_version: CONFIG_SCHEMA_VERSION,
        format_version: FORMAT_VERSION.to_string(),
        lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        stale_lock_after_ms: DEFAULT_STALE_LOCK_AFTER_MS,
        hash_threads: 0,
    }
}

pub fn config_path(repo_root: &Path) -> PathBuf {
    repo_root.join(CONFIG_FILE)
}

/// Load `repo.json` from a repository root.
pub fn load_config(repo_root: &Path) -> Result<RepoConfig, ConfigError> {
    let path = config_path(repo_root);
    let bytes = fs::read(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let config: RepoConfig =
        serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse { path, source })?;
    Ok(config)
}

/// Persist a config in a stable JSON format.
pub fn write_config(repo_root: &Path, config: &RepoConfig) -> Result<(), ConfigError> {
    let path = config_path(repo_root);
    let text = serde_json::to_string_pretty(config).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })?;
    fs::write(&path, text.as_bytes()).map_err(|source| ConfigError::Io { path, source })?;
    Ok(())
}

/// Reject configs this build cannot honor.
pub fn validate_config(config: &RepoConfig) -> Result<(), ConfigError> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(ConfigError::Invalid(format!(
            "unsupported repo.json schema_version {}",
            config.schema_version
        )));
    }
    if config.format_version != FORMAT_VERSION {
        return Err(ConfigError::Invalid(format!(
            "unsupported repository format_version {:?}",
            config.format_version
        )));
    }
    if config.lock_timeout_ms == 0 {
        return Err(ConfigError::Invalid(
            "lock_timeout_ms must be positive".to_string(),
        ));
    }
    if config.stale_lock_after_ms == 0 {
        return Err(ConfigError::Invalid(
            "stale_lock_after_ms must be positive".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
