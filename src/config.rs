//! Configuration loader and validator for the Instagram→Google Business Profile sync.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub ledger: Ledger,
    pub instagram: Instagram,
    pub google: Google,
    #[serde(default)]
    pub sync: SyncOptions,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    pub poll_interval_secs: u64,
    #[serde(default = "default_poll_limit")]
    pub poll_limit: u32,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    #[default]
    Jsonl,
    Sqlite,
}

/// Where sync records are kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Ledger {
    #[serde(default)]
    pub backend: LedgerBackend,
    #[serde(default)]
    pub database_url: Option<String>,
}

/// Instagram Graph API credentials and webhook secrets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instagram {
    pub access_token: String,
    pub user_id: String,
    pub app_secret: String,
    pub verify_token: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

/// Google Business Profile OAuth client and target location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Google {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub account_id: String,
    pub location_id: String,
}

/// Filtering and listing options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncOptions {
    #[serde(default = "default_target_tag")]
    pub target_tag: String,
    #[serde(default = "default_language_code")]
    pub language_code: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            target_tag: default_target_tag(),
            language_code: default_language_code(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".into()
}

fn default_poll_limit() -> u32 {
    25
}

fn default_retention_days() -> u32 {
    90
}

fn default_api_version() -> String {
    "v21.0".into()
}

fn default_target_tag() -> String {
    "#MEO".into()
}

fn default_language_code() -> String {
    "ja".into()
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn records_path(&self) -> PathBuf {
        Path::new(&self.app.data_dir).join("sync_records.jsonl")
    }

    pub fn cursor_path(&self) -> PathBuf {
        Path::new(&self.app.data_dir).join("poll_state.json")
    }

    pub fn database_url(&self) -> String {
        self.ledger
            .database_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| format!("sqlite://{}/ledger.db", self.app.data_dir))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.bind_addr.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::Invalid("app.bind_addr must be a socket address"));
    }
    if cfg.app.poll_interval_secs == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_secs must be > 0"));
    }
    if cfg.app.poll_limit == 0 || cfg.app.poll_limit > 100 {
        return Err(ConfigError::Invalid("app.poll_limit must be within 1..=100"));
    }
    if cfg.app.retention_days == 0 {
        return Err(ConfigError::Invalid("app.retention_days must be > 0"));
    }

    let ig = &cfg.instagram;
    if ig.access_token.trim().is_empty() {
        return Err(ConfigError::Invalid("instagram.access_token must be non-empty"));
    }
    if ig.user_id.trim().is_empty() {
        return Err(ConfigError::Invalid("instagram.user_id must be non-empty"));
    }
    if ig.app_secret.trim().is_empty() {
        return Err(ConfigError::Invalid("instagram.app_secret must be non-empty"));
    }
    if ig.verify_token.trim().is_empty() {
        return Err(ConfigError::Invalid("instagram.verify_token must be non-empty"));
    }

    let g = &cfg.google;
    if g.client_id.trim().is_empty() {
        return Err(ConfigError::Invalid("google.client_id must be non-empty"));
    }
    if g.client_secret.trim().is_empty() {
        return Err(ConfigError::Invalid("google.client_secret must be non-empty"));
    }
    if g.refresh_token.trim().is_empty() {
        return Err(ConfigError::Invalid("google.refresh_token must be non-empty"));
    }
    if g.account_id.trim().is_empty() {
        return Err(ConfigError::Invalid("google.account_id must be non-empty"));
    }
    if g.location_id.trim().is_empty() {
        return Err(ConfigError::Invalid("google.location_id must be non-empty"));
    }

    if cfg.sync.target_tag.trim_start_matches('#').trim().is_empty() {
        return Err(ConfigError::Invalid("sync.target_tag must be non-empty"));
    }

    Ok(())
}

/// Returns a complete example configuration.
pub fn example() -> &'static str {
    r##"app:
  data_dir: "./data"
  bind_addr: "0.0.0.0:3000"
  poll_interval_secs: 900
  poll_limit: 25
  retention_days: 90

ledger:
  backend: "jsonl"

instagram:
  access_token: "YOUR_INSTAGRAM_ACCESS_TOKEN"
  user_id: "17841400000000000"
  app_secret: "YOUR_META_APP_SECRET"
  verify_token: "YOUR_WEBHOOK_VERIFY_TOKEN"
  api_version: "v21.0"

google:
  client_id: "YOUR_GOOGLE_CLIENT_ID"
  client_secret: "YOUR_GOOGLE_CLIENT_SECRET"
  refresh_token: "YOUR_GOOGLE_REFRESH_TOKEN"
  account_id: "123456789"
  location_id: "987654321"

sync:
  target_tag: "#MEO"
  language_code: "ja"
"##
}
