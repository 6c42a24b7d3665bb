//! Configuration loading and root folder layout
//!
//! Settings are resolved with the priority order
//! command line > environment > TOML file > compiled default.
//! This module owns the TOML file format and the on-disk layout derived from
//! the root folder; the service crate layers CLI/ENV on top.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the root folder
pub const ENV_ROOT_FOLDER: &str = "RCPT_ROOT_FOLDER";

/// Logging section of the TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// EnvFilter directive used when RUST_LOG is not set
    pub level: Option<String>,
}

/// Contents of `config.toml`; every key is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: Option<String>,
    pub gemini_base_url: Option<String>,
    pub purge_staging_on_start: Option<bool>,
    pub max_upload_bytes: Option<usize>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Default location of the config file (`~/.config/rcpt/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("rcpt").join("config.toml"))
}

/// Load the TOML config
///
/// An explicit path must exist. Without one, the default location is tried and
/// a missing file yields an empty config. A file that exists but does not
/// parse is always an error.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => {
                debug!("No config file found, using defaults");
                return Ok(TomlConfig::default());
            }
        },
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!("Loaded config file: {}", path.display());
    Ok(config)
}

/// Root folder resolution:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&Path>, toml: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ENV_ROOT_FOLDER) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("rcpt"))
        .unwrap_or_else(|| PathBuf::from("./rcpt_data"))
}

/// Directory layout under the root folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootFolderLayout {
    root: PathBuf,
}

impl RootFolderLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// SQLite database file
    pub fn database_path(&self) -> PathBuf {
        self.root.join("receipts.db")
    }

    /// Staging area for uploads awaiting extraction
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    /// Permanent storage root, organized `<year>/<category>/<name>`
    pub fn permanent_dir(&self) -> PathBuf {
        self.root.join("receipts")
    }

    /// Create the root, staging and permanent directories if missing
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [self.root.clone(), self.staging_dir(), self.permanent_dir()] {
            if !dir.exists() {
                std::fs::create_dir_all(&dir)?;
                info!("Created directory: {}", dir.display());
            }
        }
        Ok(())
    }
}
