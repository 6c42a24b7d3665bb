//! Service configuration for rcpt-ingest
//!
//! Resolved once at startup. Priority: command line > environment > TOML file
//! > compiled default. The Gemini API key has no default; a missing or blank
//! key is a configuration error and the service refuses to start.

use clap::Parser;
use rcpt_common::config::{resolve_root_folder, RootFolderLayout, TomlConfig};
use rcpt_common::{Error, Result};
use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::services::gemini_client::{DEFAULT_MODEL, GEMINI_BASE_URL};

pub const ENV_GEMINI_API_KEY: &str = "GEMINI_API_KEY";
pub const ENV_GEMINI_MODEL: &str = "RCPT_GEMINI_MODEL";
pub const ENV_GEMINI_BASE_URL: &str = "RCPT_GEMINI_BASE_URL";

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Command-line arguments for rcpt-ingest
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "rcpt-ingest")]
#[command(about = "PDF receipt ingestion service")]
#[command(version)]
pub struct Args {
    /// Path to config.toml (default: ~/.config/rcpt/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Root folder holding the database, staging area and receipts
    #[arg(long)]
    pub root_folder: Option<PathBuf>,

    /// Address to bind
    #[arg(long, env = "RCPT_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Discard staged, unprocessed uploads at startup
    #[arg(long, env = "RCPT_PURGE_STAGING")]
    pub purge_staging: bool,
}

/// Fully resolved service configuration
#[derive(Clone)]
pub struct ServiceConfig {
    pub layout: RootFolderLayout,
    pub host: String,
    pub port: u16,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub purge_staging_on_start: bool,
    pub max_upload_bytes: usize,
}

impl ServiceConfig {
    /// Combine CLI arguments, environment and the TOML file
    pub fn resolve(args: &Args, toml: &TomlConfig) -> Result<Self> {
        let root = resolve_root_folder(args.root_folder.as_deref(), toml);

        let gemini_api_key = resolve_api_key(toml)?;
        let gemini_model = env_value(ENV_GEMINI_MODEL)
            .or_else(|| toml.gemini_model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let gemini_base_url = env_value(ENV_GEMINI_BASE_URL)
            .or_else(|| toml.gemini_base_url.clone())
            .unwrap_or_else(|| GEMINI_BASE_URL.to_string());

        Ok(Self {
            layout: RootFolderLayout::new(root),
            host: args
                .host
                .clone()
                .or_else(|| toml.host.clone())
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: args.port.or(toml.port).unwrap_or(DEFAULT_PORT),
            gemini_api_key,
            gemini_model,
            gemini_base_url,
            purge_staging_on_start: args.purge_staging
                || toml.purge_staging_on_start.unwrap_or(false),
            max_upload_bytes: toml.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("root", &self.layout.root())
            .field("host", &self.host)
            .field("port", &self.port)
            .field("gemini_api_key", &"<redacted>")
            .field("gemini_model", &self.gemini_model)
            .field("gemini_base_url", &self.gemini_base_url)
            .field("purge_staging_on_start", &self.purge_staging_on_start)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish()
    }
}

/// EnvFilter directive: RUST_LOG wins, then `[logging] level`, then `info`
pub fn log_filter(toml: &TomlConfig) -> String {
    env_value("RUST_LOG")
        .or_else(|| toml.logging.level.clone())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
}

/// Gemini API key: environment, then TOML
fn resolve_api_key(toml: &TomlConfig) -> Result<String> {
    let env_key = env_value(ENV_GEMINI_API_KEY);
    let toml_key = toml
        .gemini_api_key
        .clone()
        .filter(|key| !key.trim().is_empty());

    if env_key.is_some() && toml_key.is_some() {
        warn!("Gemini API key found in environment and TOML config; using environment");
    }

    match (env_key, toml_key) {
        (Some(key), _) => {
            info!("Gemini API key loaded from environment variable");
            Ok(key)
        }
        (None, Some(key)) => {
            info!("Gemini API key loaded from TOML config");
            Ok(key)
        }
        (None, None) => Err(Error::Config(format!(
            "Gemini API key not configured. Set {} or gemini_api_key in config.toml",
            ENV_GEMINI_API_KEY
        ))),
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
