use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fetch::{Backoff, RetryPolicy};
use crate::pokeapi::DEFAULT_BASE_URL;

/// Environment variable that overrides `api.base_url`.
pub const API_URL_ENV: &str = "DEXFETCH_API_URL";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub fetch: FetchConfig,
  pub cache: CacheConfig,
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  pub page_size: usize,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: DEFAULT_BASE_URL.to_string(),
      page_size: 20,
    }
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
  /// Total attempts per fetch, including the first
  pub max_retries: u32,
  pub attempt_timeout_ms: u64,
  pub backoff_base_ms: u64,
  pub max_jitter_ms: u64,
}

impl Default for FetchConfig {
  fn default() -> Self {
    Self {
      max_retries: 3,
      attempt_timeout_ms: 8000,
      backoff_base_ms: 1000,
      max_jitter_ms: 500,
    }
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
  pub ttl_minutes: i64,
  /// Keep entries in SQLite across runs (otherwise memory only)
  pub persist: bool,
  /// Database file (default: $XDG_DATA_HOME/dexfetch/cache.db)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_minutes: 30,
      persist: true,
      path: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
  /// Log directory (default: $XDG_DATA_HOME/dexfetch)
  pub dir: Option<PathBuf>,
  /// EnvFilter directives, overridden by DEXFETCH_LOG
  pub filter: String,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      dir: None,
      filter: "info".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./dexfetch.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/dexfetch/config.yaml
  ///
  /// Without a file the defaults apply. `DEXFETCH_API_URL` overrides the base URL
  /// either way.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    if let Ok(url) = std::env::var(API_URL_ENV) {
      config.api.base_url = url;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("dexfetch.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("dexfetch").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.api.page_size == 0 {
      return Err(eyre!("api.page_size must be at least 1"));
    }
    if config.fetch.max_retries == 0 {
      return Err(eyre!("fetch.max_retries must be at least 1"));
    }
    Ok(config)
  }

  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_retries: self.fetch.max_retries,
      attempt_timeout: Duration::from_millis(self.fetch.attempt_timeout_ms),
      backoff: Backoff {
        base: Duration::from_millis(self.fetch.backoff_base_ms),
        max_jitter: Duration::from_millis(self.fetch.max_jitter_ms),
      },
    }
  }

  pub fn ttl(&self) -> chrono::Duration {
    chrono::Duration::minutes(self.cache.ttl_minutes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;
  use tempfile::NamedTempFile;

  #[test]
  fn test_empty_file_uses_defaults() {
    let config = Config::parse("{}").unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.retry_policy(), RetryPolicy::default());
    assert_eq!(config.ttl(), chrono::Duration::minutes(30));
  }

  #[test]
  fn test_partial_sections() {
    let config = Config::parse(
      "fetch:\n  max_retries: 5\n  max_jitter_ms: 0\ncache:\n  persist: false\n",
    )
    .unwrap();

    assert_eq!(config.fetch.max_retries, 5);
    assert_eq!(config.fetch.attempt_timeout_ms, 8000);
    assert!(!config.cache.persist);
    assert_eq!(config.api.page_size, 20);

    let policy = config.retry_policy();
    assert_eq!(policy.max_retries, 5);
    assert_eq!(policy.backoff.max_jitter, Duration::ZERO);
  }

  #[test]
  fn test_rejects_zero_page_size() {
    assert!(Config::parse("api:\n  page_size: 0\n").is_err());
    assert!(Config::parse("fetch:\n  max_retries: 0\n").is_err());
  }

  #[test]
  fn test_explicit_path() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "api:\n  page_size: 50\nlog:\n  filter: debug").unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.api.page_size, 50);
    assert_eq!(config.log.filter, "debug");
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(Some(&dir.path().join("nope.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
