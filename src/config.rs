use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::FreshnessPolicy;
use crate::journal::SyncSettings;
use crate::replay::Backoff;

/// Environment variable that overrides `api.base_url`.
pub const API_URL_ENV: &str = "JOURNAL_SYNC_API_URL";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  /// Where caches, the queue and logs live (defaults to the platform data dir)
  pub data_dir: Option<PathBuf>,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub replay: ReplayConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub base_url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  #[serde(default = "default_user_agent")]
  pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Served without a network call
  pub fresh_ttl_secs: i64,
  /// Served immediately while revalidating
  pub offline_ttl_secs: i64,
  /// `prune` drops anything older than this
  pub retention_days: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      fresh_ttl_secs: 5 * 60,
      offline_ttl_secs: 24 * 60 * 60,
      retention_days: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
  pub base_delay_secs: i64,
  pub max_delay_secs: i64,
  /// Attempts after which a queued write is reported as stuck
  pub conflict_threshold: u32,
}

impl Default for ReplayConfig {
  fn default() -> Self {
    Self {
      base_delay_secs: 5,
      max_delay_secs: 15 * 60,
      conflict_threshold: 5,
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_user_agent() -> String {
  format!("journal-sync/{}", env!("CARGO_PKG_VERSION"))
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./journal-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/journal-sync/config.yaml
  ///
  /// `JOURNAL_SYNC_API_URL` overrides the API base URL from the file.
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
      None => {
        return Err(eyre!(
          "No configuration file found. Create one at ~/.config/journal-sync/config.yaml\n\
                 See config.example.yaml for the format."
        ))
      }
    };

    if let Ok(url) = std::env::var(API_URL_ENV) {
      config.api.base_url = url;
    }
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("journal-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("journal-sync").join("config.yaml");
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

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.cache.fresh_ttl_secs <= 0 || self.cache.offline_ttl_secs < self.cache.fresh_ttl_secs {
      return Err(eyre!(
        "cache.offline_ttl_secs must be at least cache.fresh_ttl_secs, and both positive"
      ));
    }
    if self.replay.base_delay_secs <= 0 || self.replay.max_delay_secs < self.replay.base_delay_secs {
      return Err(eyre!(
        "replay.max_delay_secs must be at least replay.base_delay_secs, and both positive"
      ));
    }
    Ok(())
  }

  /// Get the sign-in password from the environment.
  ///
  /// Checks JOURNAL_SYNC_PASSWORD.
  pub fn get_password() -> Result<String> {
    std::env::var("JOURNAL_SYNC_PASSWORD")
      .map_err(|_| eyre!("Password not found. Set JOURNAL_SYNC_PASSWORD environment variable."))
  }

  pub fn timeout(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.api.timeout_secs)
  }

  pub fn retention(&self) -> chrono::Duration {
    chrono::Duration::days(self.cache.retention_days)
  }

  pub fn sync_settings(&self) -> SyncSettings {
    SyncSettings {
      freshness: FreshnessPolicy {
        fresh_ttl: chrono::Duration::seconds(self.cache.fresh_ttl_secs),
        offline_ttl: chrono::Duration::seconds(self.cache.offline_ttl_secs),
      },
      backoff: Backoff::new(
        chrono::Duration::seconds(self.replay.base_delay_secs),
        chrono::Duration::seconds(self.replay.max_delay_secs),
      ),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_gets_defaults() {
    let config = Config::parse("api:\n  base_url: https://journal.example.com/api/\n").unwrap();
    assert_eq!(config.api.timeout_secs, 30);
    assert!(config.api.user_agent.starts_with("journal-sync/"));
    assert!(config.data_dir.is_none());
    assert_eq!(config.replay.conflict_threshold, 5);

    let settings = config.sync_settings();
    assert_eq!(settings.freshness.fresh_ttl, chrono::Duration::minutes(5));
    assert_eq!(settings.freshness.offline_ttl, chrono::Duration::hours(24));
    assert_eq!(settings.backoff.max, chrono::Duration::minutes(15));
    assert_eq!(config.retention(), chrono::Duration::days(30));
  }

  #[test]
  fn test_overrides_are_read() {
    let config = Config::parse(
      r#"
api:
  base_url: http://localhost:8080
  timeout_secs: 5
data_dir: /tmp/journal
cache:
  fresh_ttl_secs: 60
replay:
  base_delay_secs: 1
  max_delay_secs: 60
"#,
    )
    .unwrap();
    assert_eq!(config.timeout(), std::time::Duration::from_secs(5));
    assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/journal")));
    assert_eq!(config.cache.fresh_ttl_secs, 60);
    assert_eq!(config.cache.offline_ttl_secs, 24 * 60 * 60);
    assert_eq!(config.sync_settings().backoff.base, chrono::Duration::seconds(1));
  }

  #[test]
  fn test_inverted_ttls_are_rejected() {
    let result = Config::parse(
      "api:\n  base_url: http://localhost\ncache:\n  fresh_ttl_secs: 600\n  offline_ttl_secs: 60\n",
    );
    assert!(result.is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Config::load(Some(&dir.path().join("nope.yaml"))).is_err());
  }
}
