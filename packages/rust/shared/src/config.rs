//! Application configuration for Feedloom.
//!
//! User config lives at `~/.feedloom/feedloom.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FeedloomError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "feedloom.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".feedloom";

// ---------------------------------------------------------------------------
// Config structs (matching feedloom.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Transformer service settings.
    #[serde(default)]
    pub transformer: TransformerConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Path to the libSQL database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// IANA timezone all cron schedules are evaluated in.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Maximum serialized length of a chunk sent to the transformer.
    #[serde(default = "default_chunk_max_len")]
    pub chunk_max_len: usize,

    /// Maximum items transformed concurrently within one task run.
    #[serde(default = "default_item_concurrency")]
    pub item_concurrency: usize,

    /// Seconds between scheduler reconciliation passes.
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            timezone: default_timezone(),
            chunk_max_len: default_chunk_max_len(),
            item_concurrency: default_item_concurrency(),
            resync_interval_secs: default_resync_interval_secs(),
        }
    }
}

fn default_database_path() -> String {
    "~/.feedloom/feedloom.db".into()
}
fn default_timezone() -> String {
    "Asia/Shanghai".into()
}
fn default_chunk_max_len() -> usize {
    1000
}
fn default_item_concurrency() -> usize {
    4
}
fn default_resync_interval_secs() -> u64 {
    60
}

/// `[transformer]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformerConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL of the OpenAI-compatible chat completions endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Default model used when a task's `task_data` names none.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Per-request timeout in seconds. A hung transformer call would
    /// otherwise pin the task's re-entrancy guard indefinitely.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            default_model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_key_env() -> String {
    "FEEDLOOM_API_KEY".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_timeout_secs() -> u64 {
    120
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.feedloom/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| FeedloomError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.feedloom/feedloom.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| FeedloomError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        FeedloomError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| FeedloomError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| FeedloomError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| FeedloomError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` in a configured path against the user's home.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Check that the transformer API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.transformer.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(FeedloomError::config(format!(
            "transformer API key not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Parse the configured timezone into a [`chrono_tz::Tz`].
pub fn parse_timezone(config: &AppConfig) -> Result<chrono_tz::Tz> {
    config
        .defaults
        .timezone
        .parse()
        .map_err(|e| FeedloomError::config(format!("invalid timezone: {e}")))
}
