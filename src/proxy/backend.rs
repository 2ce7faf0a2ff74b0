//! Backend servers
//!
//! `Backend` is the capability the balancer rotates over. `UpstreamServer` is
//! the production implementation: a fixed origin URL plus the `Upstream`
//! handle that forwards to it.

use crate::error::ConfigError;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::proxy::upstream::{error_response, Upstream};
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One upstream server the balancer can route to.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Base URL of the upstream, exactly as configured.
    fn address(&self) -> &str;

    /// Whether the backend may receive traffic right now.
    fn is_alive(&self) -> bool;

    /// Relays `request` to the upstream and returns what it answered.
    ///
    /// Upstream statuses are returned verbatim. Transport failures are
    /// reported as a gateway error response; nothing is retried.
    async fn forward(&self, request: &Request) -> Response;
}

/// A backend reached over HTTP or HTTPS.
#[derive(Debug, Clone)]
pub struct UpstreamServer {
    address: String,
    upstream: Upstream,
}

impl UpstreamServer {
    /// Create a backend with the default timeouts.
    ///
    /// # Example
    ///
    /// ```
    /// # use roundabout::proxy::backend::{Backend, UpstreamServer};
    /// let server = UpstreamServer::new("https://example.com").unwrap();
    /// assert_eq!(server.address(), "https://example.com");
    /// assert!(UpstreamServer::new("not a url \x00").is_err());
    /// ```
    pub fn new(address: &str) -> Result<Self, ConfigError> {
        Self::with_timeouts(address, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeouts(
        address: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let url = Url::parse(address).map_err(|source| ConfigError::InvalidBackendUrl {
            address: address.to_string(),
            source,
        })?;

        Ok(Self {
            address: address.to_string(),
            upstream: Upstream::new(url, connect_timeout, request_timeout)?,
        })
    }

    pub fn upstream(&self) -> &Upstream {
        &self.upstream
    }
}

#[async_trait]
impl Backend for UpstreamServer {
    fn address(&self) -> &str {
        &self.address
    }

    /// No health check is performed; every upstream server counts as alive.
    fn is_alive(&self) -> bool {
        true
    }

    async fn forward(&self, request: &Request) -> Response {
        match self.upstream.forward(request).await {
            Ok(response) => {
                tracing::debug!(
                    backend = %self.address,
                    status = response.status.as_u16(),
                    method = %request.method,
                    path = %request.path,
                    "Upstream responded"
                );
                response
            }
            Err(e) => {
                tracing::warn!(
                    backend = %self.address,
                    error = %e,
                    method = %request.method,
                    path = %request.path,
                    "Failed to proxy request to backend"
                );
                error_response(&e)
            }
        }
    }
}
