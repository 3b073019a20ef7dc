//! Application configuration for catalogsync.
//!
//! User config lives at `~/.catalogsync/catalogsync.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{CatalogSyncError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "catalogsync.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".catalogsync";

// ---------------------------------------------------------------------------
// Config structs (matching catalogsync.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote catalog service settings.
    #[serde(default)]
    pub catalog: CatalogSection,

    /// Refresh scheduling.
    #[serde(default)]
    pub refresh: RefreshSection,

    /// Artifact locations.
    #[serde(default)]
    pub artifacts: ArtifactsSection,
}

/// `[catalog]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSection {
    /// Base URL of the vehicle catalog API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model year to import.
    #[serde(default = "default_year")]
    pub year: u32,

    /// Pacing interval: at most one request is dispatched per interval.
    #[serde(default = "default_request_interval")]
    pub request_interval_ms: u64,

    /// Transport timeout for a single request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for CatalogSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            year: default_year(),
            request_interval_ms: default_request_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.edmunds.com".into()
}
fn default_api_key_env() -> String {
    "EDMUNDS_API_KEY".into()
}
fn default_year() -> u32 {
    2016
}
fn default_request_interval() -> u64 {
    500
}
fn default_request_timeout() -> u64 {
    30
}

/// `[refresh]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshSection {
    /// Maximum document age before an automatic refresh.
    #[serde(default = "default_staleness")]
    pub staleness_threshold_secs: u64,

    /// Period of the staleness check timer.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
}

impl Default for RefreshSection {
    fn default() -> Self {
        Self {
            staleness_threshold_secs: default_staleness(),
            check_interval_secs: default_check_interval(),
        }
    }
}

fn default_staleness() -> u64 {
    24 * 60 * 60
}
fn default_check_interval() -> u64 {
    60 * 60
}

/// `[artifacts]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsSection {
    /// Raw crawl snapshot.
    #[serde(default = "default_raw_path")]
    pub raw_path: String,

    /// Mapped problem document served to the front-end.
    #[serde(default = "default_document_path")]
    pub document_path: String,

    /// Problem template providing subject and columns.
    #[serde(default = "default_template_path")]
    pub template_path: String,
}

impl Default for ArtifactsSection {
    fn default() -> Self {
        Self {
            raw_path: default_raw_path(),
            document_path: default_document_path(),
            template_path: default_template_path(),
        }
    }
}

fn default_raw_path() -> String {
    "var/catalog/cars_raw.json".into()
}
fn default_document_path() -> String {
    "var/catalog/auto.json".into()
}
fn default_template_path() -> String {
    "config/problem.template.json".into()
}

// ---------------------------------------------------------------------------
// Runtime config (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime catalog client configuration with the API key resolved.
#[derive(Clone)]
pub struct CatalogConfig {
    /// Base URL all endpoint paths are joined onto.
    pub base_url: Url,
    /// API key appended to every request.
    pub api_key: String,
    /// Model year to import.
    pub year: u32,
    /// Pacing interval between dispatches.
    pub request_interval: Duration,
    /// Transport timeout for one request.
    pub request_timeout: Duration,
}

impl std::fmt::Debug for CatalogConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogConfig")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"<redacted>")
            .field("year", &self.year)
            .field("request_interval", &self.request_interval)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl CatalogConfig {
    /// Build the runtime config, reading the API key from the environment.
    pub fn from_app(config: &AppConfig) -> Result<Self> {
        let api_key = resolve_api_key(config)?;
        Self::with_api_key(config, api_key)
    }

    /// Build the runtime config with an explicit API key.
    pub fn with_api_key(config: &AppConfig, api_key: impl Into<String>) -> Result<Self> {
        let base_url = Url::parse(&config.catalog.base_url).map_err(|e| {
            CatalogSyncError::config(format!(
                "invalid catalog base_url '{}': {e}",
                config.catalog.base_url
            ))
        })?;

        if config.catalog.request_interval_ms == 0 {
            return Err(CatalogSyncError::config(
                "catalog.request_interval_ms must be greater than zero",
            ));
        }

        Ok(Self {
            base_url,
            api_key: api_key.into(),
            year: config.catalog.year,
            request_interval: Duration::from_millis(config.catalog.request_interval_ms),
            request_timeout: Duration::from_secs(config.catalog.request_timeout_secs),
        })
    }
}

/// Runtime refresh scheduling configuration.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Maximum artifact age before an automatic refresh.
    pub staleness_threshold: Duration,
    /// Period of the staleness check timer.
    pub check_interval: Duration,
}

impl From<&AppConfig> for RefreshConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            staleness_threshold: Duration::from_secs(config.refresh.staleness_threshold_secs),
            check_interval: Duration::from_secs(config.refresh.check_interval_secs),
        }
    }
}

/// Resolved artifact file locations.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub raw_path: PathBuf,
    pub document_path: PathBuf,
    pub template_path: PathBuf,
}

impl From<&AppConfig> for ArtifactPaths {
    fn from(config: &AppConfig) -> Self {
        Self {
            raw_path: PathBuf::from(&config.artifacts.raw_path),
            document_path: PathBuf::from(&config.artifacts.document_path),
            template_path: PathBuf::from(&config.artifacts.template_path),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.catalogsync/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CatalogSyncError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.catalogsync/catalogsync.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CatalogSyncError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        CatalogSyncError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CatalogSyncError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CatalogSyncError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CatalogSyncError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the catalog API key from the configured env var.
pub fn resolve_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.catalog.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(CatalogSyncError::config(format!(
            "catalog API key not found. Set the {var_name} environment variable."
        ))),
    }
}
