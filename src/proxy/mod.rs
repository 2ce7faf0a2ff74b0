//! Reverse proxy functionality
//!
//! Backend abstraction, round-robin selection and request forwarding.

pub mod backend;
pub mod balancer;
pub mod upstream;

pub use backend::{Backend, UpstreamServer};
pub use balancer::Balancer;
pub use upstream::Upstream;
