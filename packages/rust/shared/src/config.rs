//! Application configuration for spacebook.
//!
//! User config lives at `~/.spacebook/spacebook.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpacebookError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "spacebook.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".spacebook";

// ---------------------------------------------------------------------------
// Config structs (matching spacebook.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Registered books.
    #[serde(default)]
    pub books: Vec<BookEntry>,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Page bodies fetched per batch.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Name of the `window.<var>` holding the bootstrap state.
    #[serde(default = "default_state_var")]
    pub state_var: String,

    /// Realtime socket URL; `{project}` is replaced by the project id.
    #[serde(default = "default_socket_url_template")]
    pub socket_url_template: String,

    /// Locator prefix rewritten to the space's blob base.
    #[serde(default = "default_cdn_prefix")]
    pub cdn_prefix: String,

    /// Upper bound on a single realtime request. Unset means wait forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            state_var: default_state_var(),
            socket_url_template: default_socket_url_template(),
            cdn_prefix: default_cdn_prefix(),
            request_timeout_secs: None,
        }
    }
}

fn default_concurrency() -> usize {
    25
}
fn default_state_var() -> String {
    "GITBOOK_STATE".into()
}
fn default_socket_url_template() -> String {
    "wss://{project}.firebaseio.com/.ws?v=5".into()
}
fn default_cdn_prefix() -> String {
    "https://firebasestorage.googleapis.com/v0/b/".into()
}

/// `[[books]]` entry - a registered book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookEntry {
    /// Entry URL of the hosted space.
    pub uri: String,
    /// Page ids or paths left out of the index.
    #[serde(default)]
    pub ignore: Vec<String>,
    /// Display name override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

// ---------------------------------------------------------------------------
// Book config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime configuration for one book.
#[derive(Debug, Clone)]
pub struct BookConfig {
    /// Entry URL fetched during bootstrap.
    pub entry_url: String,
    /// Page ids or paths left out of the index.
    pub ignore: Vec<String>,
    /// Batch width of the body downloader.
    pub concurrency: usize,
    pub state_var: String,
    pub socket_url_template: String,
    pub cdn_prefix: String,
    pub request_timeout: Option<Duration>,
}

impl BookConfig {
    /// Build the runtime config for `entry_url`, picking up the ignore list
    /// of a matching `[[books]]` entry.
    pub fn from_app(config: &AppConfig, entry_url: &str) -> Self {
        let ignore = config
            .books
            .iter()
            .find(|b| b.uri == entry_url)
            .map(|b| b.ignore.clone())
            .unwrap_or_default();

        Self {
            entry_url: entry_url.to_string(),
            ignore,
            concurrency: config.defaults.concurrency,
            state_var: config.defaults.state_var.clone(),
            socket_url_template: config.defaults.socket_url_template.clone(),
            cdn_prefix: config.defaults.cdn_prefix.clone(),
            request_timeout: config.defaults.request_timeout_secs.map(Duration::from_secs),
        }
    }

    /// Socket URL for the given project id.
    pub fn socket_url(&self, project_id: &str) -> String {
        self.socket_url_template.replace("{project}", project_id)
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.spacebook/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| SpacebookError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.spacebook/spacebook.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| SpacebookError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        SpacebookError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SpacebookError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SpacebookError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SpacebookError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

fn validate_config(config: &AppConfig) -> Result<()> {
    if config.defaults.concurrency == 0 {
        return Err(SpacebookError::config("defaults.concurrency must be at least 1"));
    }
    if !config.defaults.socket_url_template.contains("{project}") {
        return Err(SpacebookError::config(
            "defaults.socket_url_template must contain {project}",
        ));
    }
    Ok(())
}
