//! Dumper configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via XLOGWIRE_CONFIG or --config)
//! 3. Environment variables
//! 4. Command-line flags (applied by the caller)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use xlogwire_net::ConnectionConfig;
use xlogwire_xlog::{DEFAULT_BATCH_SIZE, DEFAULT_REPLICATION_PORT};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dump: DumpConfig,
    pub replication: ReplicationConfig,
}

impl Config {
    /// Loads `path` (or the file named by XLOGWIRE_CONFIG), then applies
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var_os("XLOGWIRE_CONFIG").map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))
    }

    /// Applies overrides looked up by variable name.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        self.dump.apply_overrides(&var);
        self.replication.apply_overrides(&var);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dump.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "dump.batch_size must be at least 1".to_string(),
            ));
        }
        if self.replication.host.is_empty() {
            return Err(ConfigError::ValidationError(
                "replication.host must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.to_lowercase() == "true"
}

/// Row dumping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    /// Rows decoded per batch.
    pub batch_size: usize,
    /// Stop at the first bad record instead of skipping it.
    pub strict: bool,
    /// YAML file with per-space field types.
    pub schema: Option<PathBuf>,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            strict: false,
            schema: None,
        }
    }
}

impl DumpConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(size) = var("XLOGWIRE_BATCH_SIZE") {
            if let Ok(n) = size.parse() {
                self.batch_size = n;
            }
        }
        if let Some(strict) = var("XLOGWIRE_STRICT") {
            self.strict = parse_flag(&strict);
        }
        if let Some(path) = var("XLOGWIRE_SCHEMA") {
            if !path.is_empty() {
                self.schema = Some(PathBuf::from(path));
            }
        }
    }
}

/// Live replication feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    /// Receive timeout; `None` waits forever.
    pub recv_timeout_ms: Option<u64>,
    /// Receive buffer size; 0 disables buffering.
    pub recv_buffer: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_REPLICATION_PORT,
            connect_timeout_ms: 10_000,
            recv_timeout_ms: None,
            recv_buffer: xlogwire_net::DEFAULT_IOB_SIZE,
        }
    }
}

impl ReplicationConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(host) = var("XLOGWIRE_HOST") {
            if !host.is_empty() {
                self.host = host;
            }
        }
        if let Some(port) = var("XLOGWIRE_PORT") {
            if let Ok(p) = port.parse() {
                self.port = p;
            }
        }
        if let Some(timeout) = var("XLOGWIRE_RECV_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.recv_timeout_ms = Some(ms);
            }
        }
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig::new(self.host.clone(), self.port)
            .with_connect_timeout(Some(Duration::from_millis(self.connect_timeout_ms)))
            .with_recv_timeout(self.recv_timeout_ms.map(Duration::from_millis))
            .with_recv_buffer(self.recv_buffer)
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
