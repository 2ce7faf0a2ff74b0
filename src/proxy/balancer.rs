//! Round-robin backend selection

use crate::config::Config;
use crate::error::{ConfigError, ProxyError};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::proxy::backend::{Backend, UpstreamServer};
use crate::proxy::upstream::error_response;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

/// Routes each request to the next backend in a fixed rotation.
pub struct Balancer {
    listen_port: u16,
    backends: Vec<Arc<dyn Backend>>,
    /// Tickets handed out so far; `ticket % backends.len()` is the slot
    rotation: AtomicUsize,
}

impl Balancer {
    /// Create a balancer over `backends`, rotating in the given order.
    pub fn new(listen_port: u16, backends: Vec<Arc<dyn Backend>>) -> Result<Self, ConfigError> {
        if backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }

        Ok(Self {
            listen_port,
            backends,
            rotation: AtomicUsize::new(0),
        })
    }

    /// Build the upstream servers named in `cfg`. Fails on the first
    /// address that is not a usable URL.
    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        let backends = cfg
            .backends
            .iter()
            .map(|address| {
                UpstreamServer::with_timeouts(address, cfg.connect_timeout(), cfg.request_timeout())
                    .map(|server| Arc::new(server) as Arc<dyn Backend>)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(cfg.port, backends)
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn backends(&self) -> &[Arc<dyn Backend>] {
        &self.backends
    }

    /// Pick the next live backend.
    ///
    /// Every inspected slot consumes one ticket, so with all backends alive
    /// call `k` lands on `backends[k % n]`. At most one full pass is made;
    /// if no backend is alive the call fails instead of spinning.
    pub fn select_next(&self) -> Result<&dyn Backend, ProxyError> {
        let count = self.backends.len();

        for _ in 0..count {
            let ticket = self.rotation.fetch_add(1, Ordering::Relaxed);
            let backend = &self.backends[ticket % count];
            if backend.is_alive() {
                return Ok(backend.as_ref());
            }
            tracing::debug!(backend = backend.address(), "Skipping backend that is not alive");
        }

        Err(ProxyError::NoLiveBackend(count))
    }

    /// Forward `request` to the next backend. There is no retry: whatever
    /// the chosen backend produced is what the client gets.
    pub async fn handle_request(&self, request: &Request) -> Response {
        let backend = match self.select_next() {
            Ok(backend) => backend,
            Err(e) => {
                tracing::error!(error = %e, path = %request.path, "No backend to forward to");
                return error_response(&e);
            }
        };

        info!(
            method = %request.method,
            path = %request.path,
            "forwarding request to address {:?}",
            backend.address()
        );

        backend.forward(request).await
    }
}
