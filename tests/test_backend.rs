//! Tests for upstream server construction and request target rewriting

use roundabout::error::ConfigError;
use roundabout::proxy::backend::{Backend, UpstreamServer};

#[test]
fn test_backend_creation() {
    let backend = UpstreamServer::new("https://example.com").unwrap();

    assert_eq!(backend.address(), "https://example.com");
    assert!(backend.is_alive());
}

#[test]
fn test_backend_address_is_stable() {
    let backend = UpstreamServer::new("http://localhost:3000/base").unwrap();

    let first = backend.address().to_string();
    for _ in 0..3 {
        assert_eq!(backend.address(), first);
    }
    assert_eq!(first, "http://localhost:3000/base");
}

#[test]
fn test_backend_rejects_malformed_address() {
    let err = UpstreamServer::new("not a url \x00").unwrap_err();
    assert!(matches!(err, ConfigError::InvalidBackendUrl { .. }));

    let err = UpstreamServer::new("http://").unwrap_err();
    assert!(matches!(err, ConfigError::InvalidBackendUrl { .. }));
}

#[test]
fn test_backend_rejects_unsupported_scheme() {
    let err = UpstreamServer::new("ftp://files.example.com").unwrap_err();
    assert!(matches!(err, ConfigError::UnsupportedScheme { .. }));
}

#[test]
fn test_host_header_omits_default_port() {
    let explicit = UpstreamServer::new("http://localhost:3000").unwrap();
    assert_eq!(explicit.upstream().host_header(), "localhost:3000");

    let default = UpstreamServer::new("https://example.com:443").unwrap();
    assert_eq!(default.upstream().host_header(), "example.com");
}

#[test]
fn test_target_joins_base_path() {
    let backend = UpstreamServer::new("http://localhost:3000/api").unwrap();
    assert_eq!(backend.upstream().target_for("/users?id=7"), "/api/users?id=7");

    let backend = UpstreamServer::new("http://localhost:3000/api/").unwrap();
    assert_eq!(backend.upstream().target_for("/users"), "/api/users");

    let backend = UpstreamServer::new("http://localhost:3000").unwrap();
    assert_eq!(backend.upstream().target_for("/users"), "/users");
    assert_eq!(backend.upstream().target_for(""), "/");
}

#[test]
fn test_target_merges_queries() {
    let backend = UpstreamServer::new("http://localhost:3000/?key=abc").unwrap();

    assert_eq!(backend.upstream().target_for("/a?b=1"), "/a?key=abc&b=1");
    assert_eq!(backend.upstream().target_for("/a"), "/a?key=abc");
}

#[test]
fn test_target_from_absolute_form() {
    let backend = UpstreamServer::new("http://localhost:3000").unwrap();
    assert_eq!(
        backend.upstream().target_for("http://proxy.local/x/y?z=1"),
        "/x/y?z=1"
    );
}
