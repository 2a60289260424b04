use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::fingerprint::FingerprintConfig;
use crate::indexer::FailurePolicy;
use crate::matcher::MatcherConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid fingerprint configuration: {0}")]
    Invalid(String),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Application configuration loaded from TOML config file.
/// Every field has a default, so the config file is optional.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Extraction parameters; an index must be queried with the ones it was built with.
    pub fingerprint: FingerprintConfig,
    pub matcher: MatcherConfig,
    pub index: IndexConfig,
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Hash-table cache for batch runs (overrides XDG default).
    pub cache_dir: Option<PathBuf>,
}

/// Corpus indexing settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct IndexConfig {
    /// What a file that fails to decode does to the whole run.
    pub on_error: FailurePolicy,
}

impl AppConfig {
    /// Load config from `~/.config/earmark/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        match config_path {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::from_toml_str(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    pub fn resolve_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default hash cache directory using the XDG cache directory.
pub fn default_cache_dir() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        dirs.cache_dir().join("hashcache")
    } else {
        // Fallback: current directory
        PathBuf::from(".hashcache")
    }
}
