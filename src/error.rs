//! Error types
//!
//! `ConfigError` is fatal and only raised while building the balancer at
//! startup. `ProxyError` is raised per request and never leaves the proxy
//! layer: it is turned into a gateway response before reaching the client.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid backend url {address:?}: {source}")]
    InvalidBackendUrl {
        address: String,
        #[source]
        source: url::ParseError,
    },

    #[error("backend url {address:?} has unsupported scheme {scheme:?}")]
    UnsupportedScheme { address: String, scheme: String },

    #[error("backend url {0:?} has no host")]
    MissingHost(String),

    #[error("at least one backend is required")]
    NoBackends,

    #[error("invalid listen port {0:?}")]
    InvalidPort(String),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("no live backend among {0} configured")]
    NoLiveBackend(usize),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    #[error("tls handshake with {host} failed: {reason}")]
    Tls { host: String, reason: String },

    #[error("upstream io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),
}
