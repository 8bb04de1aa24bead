use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin of the hosting page; relative URLs resolve against it and
  /// responses from it count as same-origin
  pub origin: Url,
  /// Network fetch timeout in seconds (no timeout when unset)
  pub fetch_timeout_secs: Option<u64>,
  /// Activate a freshly installed worker without waiting for old pages to close
  pub skip_waiting: bool,
  pub cache: CacheConfig,
  /// SQLite file for cache namespaces and the mutation queue
  pub database: Option<PathBuf>,
  pub sync: SyncConfig,
  pub notifications: NotificationConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: Url::parse("http://localhost:1420").expect("static origin parses"),
      fetch_timeout_secs: None,
      skip_waiting: true,
      cache: CacheConfig::default(),
      database: None,
      sync: SyncConfig::default(),
      notifications: NotificationConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub version: String,
  pub static_prefix: String,
  pub dynamic_prefix: String,
  /// Core assets precached at install time, in order
  pub static_assets: Vec<String>,
  /// Path prefixes served network-first
  pub api_prefixes: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: "v1".to_string(),
      static_prefix: "docworker-static".to_string(),
      dynamic_prefix: "docworker-dynamic".to_string(),
      static_assets: [
        "/",
        "/index.html",
        "/manifest.json",
        "/assets/index.css",
        "/assets/index.js",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
      api_prefixes: vec!["/api/".to_string()],
    }
  }
}

impl CacheConfig {
  pub fn static_name(&self) -> String {
    format!("{}-{}", self.static_prefix, self.version)
  }

  pub fn dynamic_name(&self) -> String {
    format!("{}-{}", self.dynamic_prefix, self.version)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Sync tag that triggers replay of pending mutations
  pub tag: String,
  /// Default write endpoint for queued mutations
  pub endpoint: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "sync-documents".to_string(),
      endpoint: "/api/documents".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  /// Body used when a push arrives without text
  pub default_body: String,
  pub icon: String,
  pub badge: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "Document Manager".to_string(),
      default_body: "New activity in your documents".to_string(),
      icon: "/icon-192.png".to_string(),
      badge: "/icon-192.png".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./docworker.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/docworker/config.yaml
  ///
  /// Falls back to built-in defaults when no file exists.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => {
        tracing::debug!("No config file found, using defaults");
        Self::default()
      }
    };

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("docworker.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("docworker").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.origin.cannot_be_a_base() {
      return Err(eyre!("origin must be an absolute base URL: {}", self.origin));
    }
    if self.cache.version.trim().is_empty() {
      return Err(eyre!("cache.version must not be empty"));
    }
    if self.cache.static_name() == self.cache.dynamic_name() {
      return Err(eyre!(
        "static and dynamic cache names collide: {}",
        self.cache.static_name()
      ));
    }
    Ok(())
  }

  pub fn fetch_timeout(&self) -> Option<Duration> {
    self.fetch_timeout_secs.map(Duration::from_secs)
  }

  /// Database path, defaulting to the user data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(ref path) = self.database {
      return Ok(path.clone());
    }
    Ok(data_dir()?.join("worker.db"))
  }
}

/// Per-user data directory for the worker (database, logs).
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("docworker"))
}
