//! # pvault-config
//!
//! Configuration for the prompt vault processor.
//!
//! Loaded once at startup from:
//! 1. Built-in defaults
//! 2. A TOML file (`--config`), sections and fields optional
//! 3. Environment variables (highest priority)
//!
//! The result is validated before any component is built, so an unknown
//! backend or mode fails at startup rather than on the first batch.

pub mod logging;

pub use logging::{init_logging, LogLevel};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("unknown storage backend {0:?}")]
    UnknownBackend(String),
    #[error("storage backend {0:?} is not supported by this build")]
    UnsupportedBackend(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub vault: VaultConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config: defaults, then the optional file, then env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                debug!("Loading config from {:?}", path);
                let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&contents)?
            }
            None => Config::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    ///
    /// Recognized: `PVAULT_BASE_PATH`, `PVAULT_SIZE_THRESHOLD`, `PVAULT_MODE`, `PVAULT_LOG`.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("PVAULT_BASE_PATH") {
            self.storage.filesystem.base_path = PathBuf::from(path);
        }
        if let Some(threshold) = lookup("PVAULT_SIZE_THRESHOLD") {
            self.vault.size_threshold = threshold.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("PVAULT_SIZE_THRESHOLD={:?}", threshold))
            })?;
        }
        if let Some(mode) = lookup("PVAULT_MODE") {
            self.vault.mode = mode.parse()?;
        }
        if let Some(level) = lookup("PVAULT_LOG") {
            self.logging.level = level.parse()?;
        }
        Ok(())
    }

    /// Reject configurations that cannot be turned into a running processor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.storage.backend_kind()?;

        if self.storage.filesystem.base_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "storage.filesystem.base_path must not be empty".to_string(),
            ));
        }
        if let Some(key) = self.vault.keys.iter().find(|k| k.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "vault.keys contains an empty key: {:?}",
                key
            )));
        }
        Ok(())
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Config::default())?)
    }
}

/// Known storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Filesystem,
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend tag, currently only `filesystem`
    pub backend: String,
    pub filesystem: FilesystemConfig,
}

impl StorageConfig {
    /// Resolve the backend tag.
    pub fn backend_kind(&self) -> Result<BackendKind, ConfigError> {
        match self.backend.as_str() {
            "filesystem" => Ok(BackendKind::Filesystem),
            "s3" => Err(ConfigError::UnsupportedBackend(self.backend.clone())),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "filesystem".to_string(),
            filesystem: FilesystemConfig::default(),
        }
    }
}

/// Filesystem backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesystemConfig {
    /// Root directory of the vault
    pub base_path: PathBuf,
    /// Object layout under `base_path`
    pub layout: FilesystemLayout,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("/data/vault"),
            layout: FilesystemLayout::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilesystemLayout {
    /// `<base>/<trace>/<span>[/event_n]/<key>`
    #[default]
    Path,
    /// `<base>/<YYYY>/<MM>/<DD>/<sha256>.vault`
    Hash,
}

/// Which attributes get vaulted and how
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Attribute keys whose values are vaulted
    pub keys: Vec<String>,
    /// Values shorter than this many bytes stay inline. 0 vaults everything.
    pub size_threshold: usize,
    pub mode: VaultMode,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            keys: vec![
                "gen_ai.prompt".to_string(),
                "gen_ai.completion".to_string(),
                "gen_ai.system_instructions".to_string(),
                "gen_ai.input.messages".to_string(),
                "gen_ai.output.messages".to_string(),
            ],
            size_threshold: 0,
            mode: VaultMode::default(),
        }
    }
}

/// What happens to a vaulted attribute
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultMode {
    /// Value becomes the encoded reference, `<key>.vault_ref` is added
    #[default]
    ReplaceWithRef,
    /// Original is deleted, only `<key>.vault_ref` remains
    #[serde(alias = "drop")]
    Remove,
    /// Original is kept, `<key>.vault_ref` is added
    KeepAndRef,
}

impl VaultMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VaultMode::ReplaceWithRef => "replace_with_ref",
            VaultMode::Remove => "remove",
            VaultMode::KeepAndRef => "keep_and_ref",
        }
    }
}

impl fmt::Display for VaultMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VaultMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "replace_with_ref" => Ok(VaultMode::ReplaceWithRef),
            "remove" | "drop" => Ok(VaultMode::Remove),
            "keep_and_ref" => Ok(VaultMode::KeepAndRef),
            other => Err(ConfigError::Invalid(format!("unknown vault mode {:?}", other))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
}
