//! Application configuration for threadcrawl.
//!
//! User config lives at `~/.threadcrawl/threadcrawl.toml`.
//! CLI arguments override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ThreadCrawlError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "threadcrawl.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".threadcrawl";

/// Character budget handed to the webpage extractor.
pub const DEFAULT_MAX_CHARS: usize = 1000;

// ---------------------------------------------------------------------------
// Config structs (matching threadcrawl.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Chat transport settings.
    #[serde(default)]
    pub slack: SlackConfig,

    /// Enrichment collaborators.
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Search index location and query defaults.
    #[serde(default)]
    pub index: IndexConfig,

    /// Named channel aliases.
    #[serde(default)]
    pub channels: Vec<ChannelEntry>,
}

/// `[slack]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Name of the env var holding the bot token (never store the token itself).
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Web API base URL.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
            api_base_url: default_api_base_url(),
        }
    }
}

fn default_token_env() -> String {
    "SLACK_BOT_TOKEN".into()
}
fn default_api_base_url() -> String {
    "https://slack.com/api".into()
}

/// `[enrichment]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Maximum characters of webpage text kept per link.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    /// Caption bridge command. Images are skipped when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption_cmd: Option<String>,

    /// Arguments passed to the caption bridge command.
    #[serde(default)]
    pub caption_args: Vec<String>,

    /// Timeout for webpage and image fetches.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            caption_cmd: None,
            caption_args: Vec::new(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_max_chars() -> usize {
    DEFAULT_MAX_CHARS
}
fn default_request_timeout() -> u64 {
    30
}

/// `[index]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Path to the index database. Defaults to `~/.threadcrawl/index.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,

    /// Default number of search results.
    #[serde(default = "default_search_limit")]
    pub search_limit: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            search_limit: default_search_limit(),
        }
    }
}

fn default_search_limit() -> u32 {
    10
}

/// `[[channels]]` entry, a human-readable alias for a channel id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub name: String,
    pub id: String,
}

impl AppConfig {
    /// Resolve a channel argument: an alias from `[[channels]]`, else the id itself.
    pub fn resolve_channel(&self, name_or_id: &str) -> String {
        let name = name_or_id.trim_start_matches('#');
        self.channels
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.id.clone())
            .unwrap_or_else(|| name_or_id.to_string())
    }

    /// Resolved index database path.
    pub fn index_path(&self) -> Result<PathBuf> {
        match &self.index.db_path {
            Some(p) => Ok(expand_home(p)),
            None => Ok(config_dir()?.join("index.db")),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.threadcrawl/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ThreadCrawlError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.threadcrawl/threadcrawl.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| ThreadCrawlError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        ThreadCrawlError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ThreadCrawlError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ThreadCrawlError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ThreadCrawlError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the Slack token from the configured env var.
pub fn validate_token(config: &AppConfig) -> Result<String> {
    let var_name = &config.slack.token_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(ThreadCrawlError::config(format!(
            "Slack token not found. Set the {var_name} environment variable \
             to a bot token with channels:history and files:read scopes."
        ))),
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
