//! Configuration module for cloudctl
//!
//! Supports YAML configuration files; command line flags are merged on top.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use coord::path::ConnectString;
use coord::{ClientConfig, StoreResult};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Coordination store configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// Cluster state configuration
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// HTTP API configuration
    #[serde(default)]
    pub http: HttpConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from YAML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Load configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to YAML file
    pub fn to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let yaml =
            serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path, yaml).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(&mut self, other: Config) {
        self.store.merge(other.store);
        self.cluster.merge(other.cluster);
        self.http.merge(other.http);
        self.log.merge(other.log);
    }
}

/// Coordination store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `host:port[,host:port][/chroot]`
    #[serde(default = "default_connect_string")]
    pub connect_string: String,
    /// Directory holding the embedded store image
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Session establishment timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Per-operation timeout in milliseconds
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            connect_string: default_connect_string(),
            data_dir: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
        }
    }
}

impl StoreConfig {
    fn merge(&mut self, other: Self) {
        if !other.connect_string.is_empty() && other.connect_string != default_connect_string() {
            self.connect_string = other.connect_string;
        }
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir;
        }
        if other.connect_timeout_ms > 0 && other.connect_timeout_ms != default_connect_timeout_ms() {
            self.connect_timeout_ms = other.connect_timeout_ms;
        }
        if other.operation_timeout_ms > 0
            && other.operation_timeout_ms != default_operation_timeout_ms()
        {
            self.operation_timeout_ms = other.operation_timeout_ms;
        }
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get operation timeout as Duration
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Client configuration, with the chroot taken from the connect string
    pub fn client_config(&self) -> StoreResult<ClientConfig> {
        let mut config = ClientConfig::from_connect_string(&self.connect_string)?;
        config.connect_timeout = self.connect_timeout();
        config.operation_timeout = self.operation_timeout();
        Ok(config)
    }

    /// The store is always hosted in-process, so the connect string may
    /// only name this machine
    pub fn check_local_hosts(&self) -> Result<(), ConfigError> {
        let cs = ConnectString::parse(&self.connect_string)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        let remote: Vec<&str> = cs
            .hosts
            .iter()
            .map(String::as_str)
            .filter(|h| !is_local_host(h))
            .collect();
        if remote.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::RemoteHosts(remote.join(",")))
        }
    }
}

fn is_local_host(host: &str) -> bool {
    let name = match host.strip_prefix('[') {
        Some(rest) => rest.split(']').next().unwrap_or(rest),
        None => host.rsplit_once(':').map_or(host, |(name, _)| name),
    };
    matches!(name, "localhost" | "127.0.0.1" | "::1")
}

/// Cluster state configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Attempts at a coherent snapshot before giving up
    #[serde(default = "default_refresh_attempts")]
    pub refresh_attempts: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            refresh_attempts: default_refresh_attempts(),
        }
    }
}

impl ClusterConfig {
    fn merge(&mut self, other: Self) {
        if other.refresh_attempts > 0 && other.refresh_attempts != default_refresh_attempts() {
            self.refresh_attempts = other.refresh_attempts;
        }
    }
}

/// HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Listen address
    #[serde(default = "default_http_addr")]
    pub addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            addr: default_http_addr(),
        }
    }
}

impl HttpConfig {
    fn merge(&mut self, other: Self) {
        if !other.addr.is_empty() && other.addr != default_http_addr() {
            self.addr = other.addr;
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LogConfig {
    fn merge(&mut self, other: Self) {
        if !other.level.is_empty() && other.level != default_log_level() {
            self.level = other.level;
        }
    }
}

// Default value functions

fn default_connect_string() -> String {
    "localhost:9983".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    30000 // 30 seconds
}

fn default_operation_timeout_ms() -> u64 {
    30000 // 30 seconds
}

fn default_refresh_attempts() -> usize {
    5
}

fn default_http_addr() -> String {
    "127.0.0.1:8983".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
    #[error("Remote coordination hosts are not supported ({0}); the store runs in-process, use --store-dir")]
    RemoteHosts(String),
}
