//! Xray Config
//!
//! This crate contains the configuration for xray. Configuration is read
//! from `config.json` in the data directory, then selected fields are
//! overridden from the environment:
//!
//! | variable            | field                |
//! |---------------------|----------------------|
//! | `N8N_API_URL`       | `api.base_url`       |
//! | `N8N_API_KEY`       | `api.api_key`        |
//! | `XRAY_DATABASE_URL` | `store.database_url` |
//!
//! A missing file is not an error; every field has a default.
//!
//! ```json
//! {
//!   "api": { "base_url": "https://n8n.example.com/api/v1", "timeout_ms": 10000 },
//!   "trace": { "literal_keys": ["headers", "cookies"] }
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use xray_trace::{
  DEFAULT_LITERAL_KEYS, DEFAULT_MAX_DEPTH, DEFAULT_MAX_SLOT_VISITS, DEFAULT_OUTPUT_INDEX, TraceOptions,
};

/// File name looked up inside the data directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  /// The configuration file exists but could not be read.
  #[error("failed to read config file {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// The configuration file is not valid JSON for [`XrayConfig`].
  #[error("failed to parse config file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct XrayConfig {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub store: StoreConfig,
  #[serde(default)]
  pub trace: TraceConfig,
}

/// Access to the n8n public REST API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
  /// Base URL including the API prefix, e.g. `http://localhost:5678/api/v1`.
  #[serde(default = "default_base_url")]
  pub base_url: String,
  /// Sent as `X-N8N-API-KEY`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub api_key: Option<String>,
  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,
}

/// Where reconstructed traces are persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
  /// SQLite connection URL. Defaults to `xray.db` in the data directory.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub database_url: Option<String>,
}

/// Trace resolution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceConfig {
  /// Keys whose values are never dereferenced.
  #[serde(default = "default_literal_keys")]
  pub literal_keys: Vec<String>,
  #[serde(default = "default_max_depth")]
  pub max_depth: usize,
  #[serde(default = "default_max_slot_visits")]
  pub max_slot_visits: usize,
  #[serde(default = "default_output_index")]
  pub output_index: usize,
}

fn default_base_url() -> String {
  "http://localhost:5678/api/v1".to_string()
}

fn default_timeout_ms() -> u64 {
  30_000
}

fn default_literal_keys() -> Vec<String> {
  DEFAULT_LITERAL_KEYS.iter().map(|k| k.to_string()).collect()
}

fn default_max_depth() -> usize {
  DEFAULT_MAX_DEPTH
}

fn default_max_slot_visits() -> usize {
  DEFAULT_MAX_SLOT_VISITS
}

fn default_output_index() -> usize {
  DEFAULT_OUTPUT_INDEX
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: default_base_url(),
      api_key: None,
      timeout_ms: default_timeout_ms(),
    }
  }
}

impl Default for TraceConfig {
  fn default() -> Self {
    Self {
      literal_keys: default_literal_keys(),
      max_depth: default_max_depth(),
      max_slot_visits: default_max_slot_visits(),
      output_index: default_output_index(),
    }
  }
}

impl From<&TraceConfig> for TraceOptions {
  fn from(config: &TraceConfig) -> Self {
    Self {
      literal_keys: config.literal_keys.clone(),
      max_depth: config.max_depth,
      max_slot_visits: config.max_slot_visits,
      output_index: config.output_index,
    }
  }
}

impl StoreConfig {
  /// The configured URL, or a SQLite file inside `data_dir`.
  pub fn database_url(&self, data_dir: &Path) -> String {
    self
      .database_url
      .clone()
      .unwrap_or_else(|| format!("sqlite://{}", data_dir.join("xray.db").display()))
  }
}

impl XrayConfig {
  /// Load `config.json` from `data_dir` and apply environment overrides.
  pub fn load(data_dir: &Path) -> Result<Self, ConfigError> {
    let path = data_dir.join(CONFIG_FILE_NAME);
    let config = if path.exists() {
      Self::from_file(&path)?
    } else {
      Self::default()
    };
    Ok(config.with_overrides(|name| std::env::var(name).ok()))
  }

  /// Read a configuration file, without environment overrides.
  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Apply overrides from `lookup` (normally the process environment).
  /// Empty values are ignored.
  pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
    let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

    if let Some(base_url) = lookup("N8N_API_URL") {
      self.api.base_url = base_url;
    }
    if let Some(api_key) = lookup("N8N_API_KEY") {
      self.api.api_key = Some(api_key);
    }
    if let Some(database_url) = lookup("XRAY_DATABASE_URL") {
      self.store.database_url = Some(database_url);
    }
    self
  }
}
