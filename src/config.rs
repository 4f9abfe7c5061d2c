use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::{RequestKey, SqliteStorage};

/// Resources precached at install time when the config does not list its own.
pub const DEFAULT_MANIFEST: &[&str] = &[
  "/",
  "/index.html",
  "/style.css",
  "/script.js",
  "/terms.html",
  "/privacy.html",
  "https://fonts.googleapis.com/css2?family=Poppins:wght@300;400;600;700&display=swap",
  "https://cdn.jsdelivr.net/npm/chart.js",
  "https://s3.tradingview.com/tv.js",
  "https://images.unsplash.com/photo-1631603090989-93f9ef6f9d80?crop=entropy&cs=tinysrgb&fit=crop&fm=jpg&h=50&w=50",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the dashboard is served from; relative resources resolve against it
  pub origin: Url,
  /// Logical name of the cache store
  pub cache_name: String,
  /// Resource served when neither cache nor network can answer
  pub fallback: String,
  /// Resources precached at install time, in order
  pub manifest: Vec<String>,
  /// SQLite database path (defaults to $XDG_DATA_HOME/pulse-cache/cache.db)
  pub database: Option<PathBuf>,
  /// Network responses with larger bodies are served but never stored
  pub max_entry_bytes: usize,
  pub user_agent: String,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: Url::parse("http://localhost:8080").expect("static origin is valid"),
      cache_name: "crypto-pulse-cache".to_string(),
      fallback: "/index.html".to_string(),
      manifest: DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect(),
      database: None,
      max_entry_bytes: 25 * 1024 * 1024,
      user_agent: concat!("pulse-cache/", env!("CARGO_PKG_VERSION")).to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./pulse-cache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/pulse-cache/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
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
      None => Self::default(),
    };
    config.validate()?;

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("pulse-cache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("pulse-cache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Check that the origin is usable and every resource resolves against it.
  pub fn validate(&self) -> Result<()> {
    if !matches!(self.origin.scheme(), "http" | "https") {
      return Err(eyre!(
        "origin must be an http(s) URL, got '{}'",
        self.origin
      ));
    }
    if self.cache_name.trim().is_empty() {
      return Err(eyre!("cache_name must not be empty"));
    }
    self.fallback_key()?;
    self.manifest_keys()?;
    Ok(())
  }

  /// Request identities of the precache manifest, in order.
  pub fn manifest_keys(&self) -> Result<Vec<RequestKey>> {
    self
      .manifest
      .iter()
      .map(|target| RequestKey::resolve(&self.origin, target))
      .collect()
  }

  pub fn fallback_key(&self) -> Result<RequestKey> {
    RequestKey::resolve(&self.origin, &self.fallback)
  }

  /// Resolve a user-supplied target (path or URL) against the origin.
  pub fn resolve(&self, target: &str) -> Result<RequestKey> {
    RequestKey::resolve(&self.origin, target)
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(path) => Ok(path.clone()),
      None => SqliteStorage::default_path(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.cache_name, "crypto-pulse-cache");
    assert_eq!(
      config.fallback_key().unwrap().url.as_str(),
      "http://localhost:8080/index.html"
    );
    assert_eq!(config.manifest_keys().unwrap().len(), DEFAULT_MANIFEST.len());
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_yaml(
      "origin: https://pulse.example.com\nmanifest:\n  - /index.html\n  - /style.css\n",
    )
    .unwrap();

    assert_eq!(config.cache_name, "crypto-pulse-cache");
    let keys = config.manifest_keys().unwrap();
    assert_eq!(keys[1].url.as_str(), "https://pulse.example.com/style.css");
  }

  #[test]
  fn test_rejects_non_http_origin() {
    let config = Config::from_yaml("origin: file:///srv/pulse\n").unwrap();
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_rejects_empty_cache_name() {
    let config = Config::from_yaml("cache_name: \"  \"\n").unwrap();
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let result = Config::load(Some(Path::new("/nonexistent/pulse-cache.yaml")));
    assert!(result.is_err());
  }
}
