use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sync::RetryConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub mutations: MutationsConfig,
  #[serde(default)]
  pub orders: OrdersConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Root of the commerce REST API
  pub base_url: String,
  pub timeout_ms: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8080/api/".to_string(),
      timeout_ms: 10_000,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Cached data older than this is re-fetched on the next read
  pub stale_time_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self { stale_time_secs: 60 }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MutationsConfig {
  /// Retry policy for mutations that opt into retries (clearing the cart)
  pub retry: RetryConfig,
  /// Delay before re-reading a resource the backend updates asynchronously
  pub refresh_delay_ms: u64,
}

impl Default for MutationsConfig {
  fn default() -> Self {
    Self {
      retry: RetryConfig::default(),
      refresh_delay_ms: 2000,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrdersConfig {
  pub page_size: usize,
}

impl Default for OrdersConfig {
  fn default() -> Self {
    Self { page_size: 10 }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Default filter directive, e.g. "info" or "shopsync=debug"
  pub level: String,
  /// Write daily-rotated log files here instead of stderr
  pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      directory: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shopsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shopsync/config.yaml
  ///
  /// Without any file the defaults are used.
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("shopsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shopsync").join("config.yaml");
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

    if config.orders.page_size == 0 {
      return Err(eyre!("orders.page_size must be at least 1 in {}", path.display()));
    }

    Ok(config)
  }

  /// Get the API token from the SHOPSYNC_API_TOKEN environment variable.
  ///
  /// Anonymous (visitor) sessions have no token.
  pub fn get_api_token() -> Option<String> {
    std::env::var("SHOPSYNC_API_TOKEN")
      .ok()
      .filter(|token| !token.is_empty())
  }

  pub fn stale_time(&self) -> chrono::Duration {
    chrono::Duration::from_std(Duration::from_secs(self.cache.stale_time_secs))
      .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
  }

  pub fn refresh_delay(&self) -> Duration {
    Duration::from_millis(self.mutations.refresh_delay_ms)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_parse_full_config() {
    let yaml = r#"
api:
  base_url: https://shop.example.com/api/
  timeout_ms: 5000
cache:
  stale_time_secs: 30
mutations:
  retry:
    retries: 2
    backoff_ms: 100
    exponential: false
  refresh_delay_ms: 1500
orders:
  page_size: 25
logging:
  level: shopsync=debug
  directory: /tmp/shopsync-logs
"#;
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.api.base_url, "https://shop.example.com/api/");
    assert_eq!(config.api.timeout_ms, 5000);
    assert_eq!(config.stale_time(), chrono::Duration::seconds(30));
    assert_eq!(config.mutations.retry.retries, 2);
    assert!(!config.mutations.retry.exponential);
    assert_eq!(config.refresh_delay(), Duration::from_millis(1500));
    assert_eq!(config.orders.page_size, 25);
    assert_eq!(config.logging.directory, Some(PathBuf::from("/tmp/shopsync-logs")));
  }

  #[test]
  fn test_missing_sections_use_defaults() {
    let config: Config = serde_yaml::from_str("api:\n  base_url: https://x.test/\n").unwrap();
    assert_eq!(config.api.timeout_ms, 10_000);
    assert_eq!(config.cache.stale_time_secs, 60);
    assert_eq!(config.mutations.refresh_delay_ms, 2000);
    assert_eq!(config.mutations.retry, RetryConfig::default());
    assert_eq!(config.orders.page_size, 10);
    assert_eq!(config.logging.level, "info");
  }

  #[test]
  fn test_load_explicit_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "orders:\n  page_size: 3").unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.orders.page_size, 3);
  }

  #[test]
  fn test_load_rejects_zero_page_size() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "orders:\n  page_size: 0").unwrap();

    assert!(Config::load(Some(file.path())).is_err());
  }

  #[test]
  fn test_load_missing_explicit_path() {
    let err = Config::load(Some(Path::new("/nonexistent/shopsync.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
