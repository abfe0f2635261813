use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::TrackerKind;
use crate::poll::{RefreshInterval, DEFAULT_REFRESH_INTERVAL};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub poll: PollConfig,
  /// Account endpoints to watch (defaults to all)
  #[serde(default = "default_trackers")]
  pub trackers: BTreeSet<TrackerKind>,
  /// Directory for daily-rolling log files; stderr only when unset
  pub log_dir: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      api: ApiConfig::default(),
      poll: PollConfig::default(),
      trackers: default_trackers(),
      log_dir: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  #[serde(default = "default_api_url")]
  pub url: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: default_api_url(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
  /// Delay between automatic refreshes in milliseconds
  #[serde(default = "default_interval_ms")]
  pub interval_ms: u64,
  /// When false, only the initial load and permission changes fetch
  #[serde(default = "default_true")]
  pub auto_refresh: bool,
  /// Host tick rate in milliseconds
  #[serde(default = "default_tick_ms")]
  pub tick_ms: u64,
  /// Wait for the first load before entering the tick loop
  #[serde(default = "default_true")]
  pub await_load: bool,
  /// How often to re-check the API key's permissions, in milliseconds
  #[serde(default = "default_token_refresh_ms")]
  pub token_refresh_ms: u64,
}

impl Default for PollConfig {
  fn default() -> Self {
    Self {
      interval_ms: default_interval_ms(),
      auto_refresh: true,
      tick_ms: default_tick_ms(),
      await_load: true,
      token_refresh_ms: default_token_refresh_ms(),
    }
  }
}

impl PollConfig {
  pub fn refresh_interval(&self) -> RefreshInterval {
    if self.auto_refresh {
      RefreshInterval::Every(Duration::from_millis(self.interval_ms))
    } else {
      RefreshInterval::Never
    }
  }

  pub fn tick_rate(&self) -> Duration {
    Duration::from_millis(self.tick_ms.max(1))
  }

  pub fn token_refresh_interval(&self) -> RefreshInterval {
    RefreshInterval::Every(Duration::from_millis(self.token_refresh_ms))
  }
}

fn default_api_url() -> String {
  "https://api.guildwars2.com".to_string()
}

fn default_interval_ms() -> u64 {
  DEFAULT_REFRESH_INTERVAL.as_millis() as u64
}

fn default_tick_ms() -> u64 {
  250
}

fn default_token_refresh_ms() -> u64 {
  60_000
}

fn default_true() -> bool {
  true
}

fn default_trackers() -> BTreeSet<TrackerKind> {
  [TrackerKind::Worldbosses, TrackerKind::Mapchests]
    .into_iter()
    .collect()
}

/// Environment variables holding the API key, in lookup order.
const API_KEY_VARS: [&str; 2] = ["ACCTWATCH_API_KEY", "GW2_API_KEY"];

impl Config {
  /// Read the configuration, falling back to defaults when no file exists.
  ///
  /// An explicit path must exist. Otherwise the first of
  /// [`Config::candidate_paths`] that exists is used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = match explicit_path {
      Some(p) if !p.exists() => return Err(eyre!("Config file not found: {}", p.display())),
      Some(p) => Some(p.to_path_buf()),
      None => Self::candidate_paths().into_iter().find(|p| p.exists()),
    };

    path.map_or_else(|| Ok(Self::default()), |p| Self::load_from_path(&p))
  }

  /// ./acctwatch.yaml, then $XDG_CONFIG_HOME/acctwatch/config.yaml.
  fn candidate_paths() -> Vec<PathBuf> {
    std::iter::once(PathBuf::from("acctwatch.yaml"))
      .chain(dirs::config_dir().map(|dir| dir.join("acctwatch").join("config.yaml")))
      .collect()
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty document deserializes as null
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }

    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// The API key from the first non-empty variable in [`API_KEY_VARS`].
  pub fn get_api_key() -> Result<String> {
    api_key_from(|name| std::env::var(name).ok())
  }
}

fn api_key_from(lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
  API_KEY_VARS
    .iter()
    .filter_map(|name| lookup(name))
    .map(|key| key.trim().to_string())
    .find(|key| !key.is_empty())
    .ok_or_else(|| eyre!("API key not found. Set {} in the environment.", API_KEY_VARS.join(" or ")))
}
