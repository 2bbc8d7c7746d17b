//! Service configuration, read from YAML. Every section is optional.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Namespace every record is scoped to
    pub namespace: String,
    pub source: SourceConfig,
    pub store: StoreConfig,
    pub poll: PollConfig,
    pub web: WebConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: "community".to_string(),
            source: SourceConfig::default(),
            store: StoreConfig::default(),
            poll: PollConfig::default(),
            web: WebConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    /// Git remote; when unset `dir` is used as-is
    pub git: Option<String>,
    pub dir: PathBuf,
    pub refresh_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            git: None,
            dir: PathBuf::from("catalog"),
            refresh_timeout_secs: 300,
        }
    }
}

impl SourceConfig {
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("state/catalog.db"),
            timeout_secs: 30,
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PollConfig {
    pub interval_secs: u64,
    /// Delay after an aborted pass
    pub backoff_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            backoff_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct WebConfig {
    pub listen: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl WebConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.listen, self.port)
    }
}

/// Parse configuration from a YAML string.
pub fn parse_config(yaml: &str) -> Result<Config, String> {
    let config: Config =
        serde_yaml_ng::from_str(yaml).map_err(|e| format!("config parse error: {}", e))?;
    validate_config(&config)?;
    Ok(config)
}

/// Load configuration. `None` yields the defaults.
pub fn load(path: Option<&Path>) -> Result<Config, String> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read config {}: {}", path.display(), e))?;
    // An empty file is a valid all-defaults config.
    if content.trim().is_empty() {
        return Ok(Config::default());
    }
    parse_config(&content).map_err(|e| format!("{}: {}", path.display(), e))
}

fn validate_config(config: &Config) -> Result<(), String> {
    if config.namespace.is_empty() {
        return Err("namespace must not be empty".to_string());
    }
    if config.poll.interval_secs == 0 {
        return Err("poll.interval_secs must be positive".to_string());
    }
    if config.source.git.as_deref() == Some("") {
        return Err("source.git must not be empty when set".to_string());
    }
    Ok(())
}
