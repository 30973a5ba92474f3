//! Runtime configuration.
//!
//! Values come from an optional JSON file, then `DASHBOARD_*` environment
//! variables, then defaults. Every field has a default so an empty file (or no
//! file) is a valid configuration for local development.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const ENV_API_URL: &str = "DASHBOARD_API_URL";
pub const ENV_WS_URL: &str = "DASHBOARD_WS_URL";
pub const ENV_POLL_INTERVAL_SECS: &str = "DASHBOARD_POLL_INTERVAL_SECS";
pub const ENV_HEARTBEAT_SECS: &str = "DASHBOARD_HEARTBEAT_SECS";
pub const ENV_MAX_RECONNECT_ATTEMPTS: &str = "DASHBOARD_MAX_RECONNECT_ATTEMPTS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "DASHBOARD_REQUEST_TIMEOUT_SECS";
pub const ENV_DEMO_FALLBACK: &str = "DASHBOARD_DEMO_FALLBACK";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value '{value}' for {name}")]
    InvalidValue { name: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// REST base, e.g. `https://crm.example.com/api`.
    pub api_base_url: String,
    /// Push channel base; the user id is appended as the last path segment.
    pub ws_base_url: String,
    pub request_timeout_ms: u64,
    pub connection: ConnectionConfig,
    pub polling: PollingConfig,
    pub history: HistoryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".to_string(),
            ws_base_url: "ws://localhost:3000/ws".to_string(),
            request_timeout_ms: 10_000,
            connection: ConnectionConfig::default(),
            polling: PollingConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionConfig {
    pub heartbeat_interval_ms: u64,
    /// Server closes sockets idle for longer than this.
    pub server_idle_timeout_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_jitter: bool,
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 25_000,
            server_idle_timeout_ms: 30_000,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            max_reconnect_attempts: 5,
            reconnect_jitter: false,
            connect_timeout_ms: 10_000,
        }
    }
}

impl ConnectionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollingConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    /// Substitute demo payloads when a read fails.
    pub demo_fallback: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
            demo_fallback: true,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryConfig {
    pub activity_capacity: usize,
    pub alert_capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            activity_capacity: dashboard_state::ACTIVITY_FEED_CAPACITY,
            alert_capacity: dashboard_state::ALERT_HISTORY_CAPACITY,
        }
    }
}

impl SyncConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Apply overrides from `lookup`, which maps variable names to values.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL) {
            self.api_base_url = url;
        }
        if let Some(url) = lookup(ENV_WS_URL) {
            self.ws_base_url = url;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_POLL_INTERVAL_SECS)? {
            self.polling.interval_ms = secs.saturating_mul(1000);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_HEARTBEAT_SECS)? {
            self.connection.heartbeat_interval_ms = secs.saturating_mul(1000);
        }
        if let Some(attempts) = parse_var::<u32, _>(&lookup, ENV_MAX_RECONNECT_ATTEMPTS)? {
            self.connection.max_reconnect_attempts = attempts;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_REQUEST_TIMEOUT_SECS)? {
            self.request_timeout_ms = secs.saturating_mul(1000);
        }
        if let Some(enabled) = parse_var::<bool, _>(&lookup, ENV_DEMO_FALLBACK)? {
            self.polling.demo_fallback = enabled;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url(&self.api_base_url, &["http", "https"], "apiBaseUrl")?;
        check_url(&self.ws_base_url, &["ws", "wss"], "wsBaseUrl")?;

        let conn = &self.connection;
        if conn.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "heartbeatIntervalMs must be greater than 0".to_string(),
            ));
        }
        if conn.heartbeat_interval_ms >= conn.server_idle_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "heartbeatIntervalMs ({}) must be shorter than serverIdleTimeoutMs ({})",
                conn.heartbeat_interval_ms, conn.server_idle_timeout_ms
            )));
        }
        if conn.reconnect_base_delay_ms == 0 || conn.reconnect_max_delay_ms < conn.reconnect_base_delay_ms {
            return Err(ConfigError::Invalid(
                "reconnect delays must satisfy 0 < base <= max".to_string(),
            ));
        }
        if self.polling.enabled && self.polling.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "polling intervalMs must be greater than 0".to_string(),
            ));
        }
        if self.history.activity_capacity == 0 || self.history.alert_capacity == 0 {
            return Err(ConfigError::Invalid(
                "history capacities must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "requestTimeoutMs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load from `path` (if given), apply environment overrides, validate.
pub fn load_config(path: Option<&Path>) -> Result<SyncConfig, ConfigError> {
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => SyncConfig::default(),
    };
    config.apply_overrides(|name| env::var(name).ok())?;
    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<SyncConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
    }
}

fn check_url(raw: &str, schemes: &[&str], field: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw)
        .map_err(|err| ConfigError::Invalid(format!("{field} '{raw}' is not a URL: {err}")))?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::Invalid(format!(
            "{field} must use one of {schemes:?}, got '{}'",
            url.scheme()
        )));
    }
    Ok(())
}
