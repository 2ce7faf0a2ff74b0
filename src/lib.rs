//! Roundabout - round-robin reverse-proxy load balancer
//!
//! Core library for HTTP handling, backend selection and forwarding.

pub mod config;
pub mod error;
pub mod http;
pub mod proxy;
pub mod server;
