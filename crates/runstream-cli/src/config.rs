//! Client configuration.

use anyhow::{bail, Context, Result};
use runstream_core::ConnectionConfig;
use runstream_types::{SessionId, TeamConfig};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the run socket endpoint; the run id is appended
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_session_id")]
    pub session_id: SessionId,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_open_poll_ms")]
    pub open_poll_ms: u64,
    #[serde(default = "default_open_timeout_secs")]
    pub open_timeout_secs: u64,
    #[serde(default)]
    pub team_config: TeamConfig,
    /// Forwarded verbatim as `settings_config`
    #[serde(default = "default_settings")]
    pub settings: Value,
}

fn default_server_url() -> String {
    "ws://127.0.0.1:8081/api/ws/runs".to_string()
}

fn default_session_id() -> SessionId {
    1
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_open_poll_ms() -> u64 {
    100
}

fn default_open_timeout_secs() -> u64 {
    10
}

fn default_settings() -> Value {
    Value::Object(Default::default())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            session_id: default_session_id(),
            heartbeat_secs: default_heartbeat_secs(),
            open_poll_ms: default_open_poll_ms(),
            open_timeout_secs: default_open_timeout_secs(),
            team_config: TeamConfig::default(),
            settings: default_settings(),
        }
    }
}

impl Config {
    /// Load config from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Every timing must be non-zero.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_secs == 0 {
            bail!("heartbeat_secs must be at least 1");
        }
        if self.open_poll_ms == 0 {
            bail!("open_poll_ms must be at least 1");
        }
        if self.open_timeout_secs == 0 {
            bail!("open_timeout_secs must be at least 1");
        }
        Ok(())
    }

    /// Load from `config/default.toml`, then the user config directory, or
    /// fall back to defaults.
    pub fn load() -> Result<Self> {
        match Self::search_paths().into_iter().find(|p| p.exists()) {
            Some(path) => Self::load_from(&path),
            None => Ok(Config::default()),
        }
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config/default.toml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("runstream").join("config.toml"));
        }
        paths
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            heartbeat: Duration::from_secs(self.heartbeat_secs),
            open_poll: Duration::from_millis(self.open_poll_ms),
            open_timeout: Duration::from_secs(self.open_timeout_secs),
        }
    }
}
