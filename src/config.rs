//! Startup configuration
//!
//! Values are layered: built-in defaults, then an optional YAML file named by
//! `ROUNDABOUT_CONFIG`, then individual environment variables.

use crate::error::ConfigError;
use crate::proxy::backend::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
use serde::Deserialize;
use std::time::Duration;

pub const CONFIG_FILE_ENV: &str = "ROUNDABOUT_CONFIG";
pub const PORT_ENV: &str = "PORT";
pub const BACKENDS_ENV: &str = "BACKENDS";
pub const CONNECT_TIMEOUT_ENV: &str = "CONNECT_TIMEOUT_SECS";
pub const REQUEST_TIMEOUT_ENV: &str = "REQUEST_TIMEOUT_SECS";

const DEFAULT_BACKENDS: [&str; 3] = [
    "https://google.com",
    "https://bing.com",
    "https://duckduckgo.com",
];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// TCP port the listener binds on all interfaces
    pub port: u16,
    /// Upstream base URLs, in rotation order
    pub backends: Vec<String>,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            backends: DEFAULT_BACKENDS.iter().map(|b| b.to_string()).collect(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration using `lookup` in place of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = match lookup(CONFIG_FILE_ENV) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        if let Some(port) = lookup(PORT_ENV) {
            cfg.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort(port.clone()))?;
        }

        if let Some(list) = lookup(BACKENDS_ENV) {
            cfg.backends = list
                .split(',')
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(secs) = lookup(CONNECT_TIMEOUT_ENV) {
            cfg.connect_timeout_secs = parse_secs(CONNECT_TIMEOUT_ENV, &secs)?;
        }
        if let Some(secs) = lookup(REQUEST_TIMEOUT_ENV) {
            cfg.request_timeout_secs = parse_secs(REQUEST_TIMEOUT_ENV, &secs)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_yaml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port.to_string()));
        }
        if self.backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_secs(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}
