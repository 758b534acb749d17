use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::rally::formatter::DEFAULT_CHUNK_SIZE;
use crate::rally::registry::DEFAULT_TTL_SECS;

/// Largest page the WSAPI accepts.
pub const MAX_PAGE_SIZE: usize = 2000;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub rally: RallyConfig,
  /// Project ref (e.g. `/project/123`) used to scope queries without a project filter
  pub default_project: Option<String>,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RallyConfig {
  #[serde(default = "default_url")]
  pub url: String,
  /// Workspace ref; the subscription default is used when unset
  pub workspace: Option<String>,
  #[serde(default = "default_page_size")]
  pub page_size: usize,
}

impl Default for RallyConfig {
  fn default() -> Self {
    Self {
      url: default_url(),
      workspace: None,
      page_size: default_page_size(),
    }
  }
}

impl RallyConfig {
  /// Page size clamped to what the WSAPI accepts.
  pub fn effective_page_size(&self) -> usize {
    self.page_size.clamp(1, MAX_PAGE_SIZE)
  }
}

fn default_url() -> String {
  "https://rally1.rallydev.com".to_string()
}

fn default_page_size() -> usize {
  200
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Lifetime of cached result sets
  pub default_ttl_secs: u64,
  /// How often expired entries are swept; 0 disables the sweep
  pub sweep_interval_secs: u64,
  /// Records formatted between two scheduler yields
  pub chunk_size: usize,
  /// Share one remote fetch between concurrent misses on the same key
  pub dedupe_inflight: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      default_ttl_secs: DEFAULT_TTL_SECS as u64,
      sweep_interval_secs: 60,
      chunk_size: DEFAULT_CHUNK_SIZE,
      dedupe_inflight: false,
    }
  }
}

impl CacheConfig {
  /// `default_ttl_secs` as a duration, or an error when it does not fit one.
  pub fn default_ttl(&self) -> Result<chrono::Duration> {
    i64::try_from(self.default_ttl_secs)
      .ok()
      .and_then(chrono::Duration::try_seconds)
      .ok_or_else(|| eyre!("cache.default_ttl_secs out of range: {}", self.default_ttl_secs))
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./rally-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/rally-sync/config.yaml
  ///
  /// Without a file every setting takes its default.
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
    let local = PathBuf::from("rally-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("rally-sync").join("config.yaml");
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

  pub fn from_yaml(contents: &str) -> Result<Self> {
    // An empty document deserializes as unit, not as an empty mapping.
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    let config: Self = serde_yaml::from_str(contents)?;
    config.cache.default_ttl()?;
    Ok(config)
  }

  /// Get the Rally API key from environment variables.
  ///
  /// Checks RALLY_SYNC_API_KEY first, then RALLY_API_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("RALLY_SYNC_API_KEY")
      .or_else(|_| std::env::var("RALLY_API_KEY"))
      .map_err(|_| {
        eyre!("Rally API key not found. Set RALLY_SYNC_API_KEY or RALLY_API_KEY environment variable.")
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_without_file_content() {
    let config = Config::from_yaml("").unwrap();
    assert_eq!(config.rally.url, "https://rally1.rallydev.com");
    assert_eq!(config.rally.page_size, 200);
    assert_eq!(config.cache.default_ttl_secs, 1800);
    assert_eq!(config.cache.sweep_interval_secs, 60);
    assert_eq!(config.cache.chunk_size, 25);
    assert!(!config.cache.dedupe_inflight);
    assert!(config.default_project.is_none());
  }

  #[test]
  fn test_partial_cache_section() {
    let config = Config::from_yaml(
      r#"
rally:
  url: https://rally.example.com
  workspace: /workspace/42
default_project: /project/123
cache:
  dedupe_inflight: true
"#,
    )
    .unwrap();

    assert_eq!(config.rally.url, "https://rally.example.com");
    assert_eq!(config.rally.workspace.as_deref(), Some("/workspace/42"));
    assert_eq!(config.rally.page_size, 200);
    assert_eq!(config.default_project.as_deref(), Some("/project/123"));
    assert!(config.cache.dedupe_inflight);
    assert_eq!(config.cache.default_ttl_secs, 1800);
  }

  #[test]
  fn test_page_size_clamped() {
    let mut rally = RallyConfig {
      page_size: 0,
      ..RallyConfig::default()
    };
    assert_eq!(rally.effective_page_size(), 1);

    rally.page_size = 10_000;
    assert_eq!(rally.effective_page_size(), MAX_PAGE_SIZE);
  }

  #[test]
  fn test_invalid_yaml_is_an_error() {
    assert!(Config::from_yaml("cache: [1, 2").is_err());
  }

  #[test]
  fn test_out_of_range_ttl_is_an_error() {
    let err = Config::from_yaml("cache:\n  default_ttl_secs: 18446744073709551615\n").unwrap_err();
    assert!(err.to_string().contains("default_ttl_secs out of range"));

    // Fits in i64 but not in a chrono duration.
    assert!(Config::from_yaml("cache:\n  default_ttl_secs: 9223372036854775807\n").is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let err = Config::load(Some(Path::new("/nonexistent/rally-sync.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
