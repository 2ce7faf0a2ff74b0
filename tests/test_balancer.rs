//! Tests for round-robin selection

use async_trait::async_trait;
use roundabout::config::Config;
use roundabout::error::{ConfigError, ProxyError};
use roundabout::http::request::{Method, Request, RequestBuilder};
use roundabout::http::response::{Response, StatusCode};
use roundabout::proxy::backend::Backend;
use roundabout::proxy::balancer::Balancer;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

struct MockBackend {
    address: String,
    alive: AtomicBool,
    served: AtomicUsize,
}

impl MockBackend {
    fn new(address: &str) -> Arc<Self> {
        Arc::new(Self {
            address: address.to_string(),
            alive: AtomicBool::new(true),
            served: AtomicUsize::new(0),
        })
    }

    fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn address(&self) -> &str {
        &self.address
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn forward(&self, _request: &Request) -> Response {
        self.served.fetch_add(1, Ordering::SeqCst);
        Response::ok(self.address.clone())
    }
}

fn balancer(mocks: &[Arc<MockBackend>]) -> Balancer {
    let backends = mocks
        .iter()
        .map(|m| Arc::clone(m) as Arc<dyn Backend>)
        .collect();
    Balancer::new(8000, backends).unwrap()
}

fn get(path: &str) -> Request {
    RequestBuilder::new()
        .method(Method::GET)
        .path(path)
        .build()
        .unwrap()
}

#[test]
fn test_select_follows_construction_order() {
    let mocks = [MockBackend::new("s0"), MockBackend::new("s1"), MockBackend::new("s2")];
    let lb = balancer(&mocks);

    let picks: Vec<String> = (0..7)
        .map(|_| lb.select_next().unwrap().address().to_string())
        .collect();

    assert_eq!(picks, vec!["s0", "s1", "s2", "s0", "s1", "s2", "s0"]);
}

#[test]
fn test_select_single_backend() {
    let mocks = [MockBackend::new("only")];
    let lb = balancer(&mocks);

    for _ in 0..5 {
        assert_eq!(lb.select_next().unwrap().address(), "only");
    }
}

#[test]
fn test_select_skips_backends_that_are_not_alive() {
    let mocks = [MockBackend::new("s0"), MockBackend::new("s1"), MockBackend::new("s2")];
    mocks[1].set_alive(false);
    let lb = balancer(&mocks);

    let picks: Vec<String> = (0..4)
        .map(|_| lb.select_next().unwrap().address().to_string())
        .collect();

    assert_eq!(picks, vec!["s0", "s2", "s0", "s2"]);
}

#[test]
fn test_select_fails_when_nothing_is_alive() {
    let mocks = [MockBackend::new("s0"), MockBackend::new("s1")];
    for m in &mocks {
        m.set_alive(false);
    }
    let lb = balancer(&mocks);

    let err = lb.select_next().err().unwrap();
    assert!(matches!(err, ProxyError::NoLiveBackend(2)));

    // selection resumes once a backend comes back
    mocks[1].set_alive(true);
    assert_eq!(lb.select_next().unwrap().address(), "s1");
}

#[test]
fn test_new_rejects_empty_backend_list() {
    let err = Balancer::new(8000, Vec::new()).err().unwrap();
    assert!(matches!(err, ConfigError::NoBackends));
}

#[test]
fn test_from_config_fails_on_bad_address() {
    let cfg = Config {
        backends: vec!["http://ok.internal".to_string(), "not a url \x00".to_string()],
        ..Config::default()
    };

    let err = Balancer::from_config(&cfg).err().unwrap();
    assert!(matches!(err, ConfigError::InvalidBackendUrl { .. }));
}

#[test]
fn test_from_config_keeps_order() {
    let cfg = Config {
        port: 9000,
        backends: vec!["http://a.internal".to_string(), "http://b.internal".to_string()],
        ..Config::default()
    };

    let lb = Balancer::from_config(&cfg).unwrap();
    let addresses: Vec<&str> = lb.backends().iter().map(|b| b.address()).collect();

    assert_eq!(lb.listen_port(), 9000);
    assert_eq!(addresses, vec!["http://a.internal", "http://b.internal"]);
}

#[tokio::test]
async fn test_handle_request_routes_in_rotation() {
    let mocks = [MockBackend::new("s0"), MockBackend::new("s1"), MockBackend::new("s2")];
    let lb = balancer(&mocks);

    let mut bodies = Vec::new();
    for _ in 0..4 {
        let response = lb.handle_request(&get("/")).await;
        bodies.push(String::from_utf8(response.body).unwrap());
    }

    assert_eq!(bodies, vec!["s0", "s1", "s2", "s0"]);
    assert_eq!(mocks[0].served.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_handle_request_without_live_backend() {
    let mocks = [MockBackend::new("s0")];
    mocks[0].set_alive(false);
    let lb = balancer(&mocks);

    let response = lb.handle_request(&get("/")).await;

    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(mocks[0].served.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_selection_is_fair() {
    let mocks = [MockBackend::new("s0"), MockBackend::new("s1"), MockBackend::new("s2")];
    let lb = Arc::new(balancer(&mocks));

    let mut tasks = Vec::new();
    for _ in 0..300 {
        let lb = Arc::clone(&lb);
        tasks.push(tokio::spawn(async move {
            lb.select_next().unwrap().address().to_string()
        }));
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    for task in tasks {
        *counts.entry(task.await.unwrap()).or_default() += 1;
    }

    assert_eq!(counts.len(), 3);
    assert!(counts.values().all(|&n| n == 100));
}
