use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  /// Location of the cache database (defaults to the user data directory)
  pub cache_path: Option<PathBuf>,
  /// User-Agent sent with network requests
  pub user_agent: Option<String>,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// Filter directive used when TMDB_SW_LOG is not set
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Directory for daily-rolling log files; stderr only when unset
  pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      dir: None,
    }
  }
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tmdb-sw.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tmdb-sw/config.yaml
  ///
  /// Falls back to defaults when no file is found.
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
    let local = PathBuf::from("tmdb-sw.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tmdb-sw").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file is a valid config with every default
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }

    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Path of the cache database.
  pub fn cache_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.cache_path {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("tmdb-sw").join("cache.db"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_full_config() {
    let config = Config::parse(
      r#"
cache_path: /tmp/tmdb/cache.db
user_agent: tmdb-sw/0.1
log:
  level: debug
  dir: /tmp/tmdb/logs
"#,
    )
    .unwrap();

    assert_eq!(config.cache_path().unwrap(), PathBuf::from("/tmp/tmdb/cache.db"));
    assert_eq!(config.user_agent.as_deref(), Some("tmdb-sw/0.1"));
    assert_eq!(config.log.level, "debug");
    assert_eq!(config.log.dir, Some(PathBuf::from("/tmp/tmdb/logs")));
  }

  #[test]
  fn test_defaults() {
    let config = Config::parse("").unwrap();
    assert!(config.cache_path.is_none());
    assert_eq!(config.log.level, "info");

    let config = Config::parse("log: {}").unwrap();
    assert_eq!(config.log.level, "info");
    assert!(config.log.dir.is_none());
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let err = Config::load(Some(Path::new("/nonexistent/tmdb-sw.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_malformed_config_is_an_error() {
    assert!(Config::parse("log: [").is_err());
  }
}
