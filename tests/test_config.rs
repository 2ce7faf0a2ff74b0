use roundabout::config::{
    Config, BACKENDS_ENV, CONFIG_FILE_ENV, CONNECT_TIMEOUT_ENV, PORT_ENV, REQUEST_TIMEOUT_ENV,
};
use roundabout::error::ConfigError;
use std::collections::HashMap;
use std::time::Duration;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key: &str| vars.get(key).cloned()
}

#[test]
fn test_config_defaults() {
    let cfg = Config::from_lookup(lookup(&[])).unwrap();

    assert_eq!(cfg.port, 8000);
    assert_eq!(
        cfg.backends,
        vec!["https://google.com", "https://bing.com", "https://duckduckgo.com"]
    );
    assert_eq!(cfg.listen_addr(), "0.0.0.0:8000");
    assert_eq!(cfg.connect_timeout(), Duration::from_secs(5));
    assert_eq!(cfg.request_timeout(), Duration::from_secs(30));
}

#[test]
fn test_config_env_overrides() {
    let cfg = Config::from_lookup(lookup(&[
        (PORT_ENV, "9090"),
        (BACKENDS_ENV, "http://127.0.0.1:3000, http://127.0.0.1:3001,"),
        (REQUEST_TIMEOUT_ENV, "12"),
    ]))
    .unwrap();

    assert_eq!(cfg.port, 9090);
    assert_eq!(
        cfg.backends,
        vec!["http://127.0.0.1:3000", "http://127.0.0.1:3001"]
    );
    assert_eq!(cfg.request_timeout(), Duration::from_secs(12));
}

#[test]
fn test_config_rejects_bad_port() {
    let err = Config::from_lookup(lookup(&[(PORT_ENV, "eighty")])).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidPort(_)));

    let err = Config::from_lookup(lookup(&[(PORT_ENV, "0")])).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidPort(_)));
}

#[test]
fn test_config_rejects_empty_backend_list() {
    let err = Config::from_lookup(lookup(&[(BACKENDS_ENV, " , ")])).unwrap_err();
    assert!(matches!(err, ConfigError::NoBackends));
}

#[test]
fn test_config_from_yaml() {
    let cfg = Config::from_yaml(
        "port: 8081\nbackends:\n  - http://a.internal\n  - http://b.internal:9000\n",
    )
    .unwrap();

    assert_eq!(cfg.port, 8081);
    assert_eq!(cfg.backends, vec!["http://a.internal", "http://b.internal:9000"]);
    // unspecified fields keep their defaults
    assert_eq!(cfg.connect_timeout_secs, 5);
}

#[test]
fn test_config_file_then_env() {
    let path = std::env::temp_dir().join(format!("roundabout-test-{}.yaml", std::process::id()));
    std::fs::write(&path, "port: 7000\nbackends: [\"http://file.internal\"]\n").unwrap();
    let path_str = path.to_string_lossy().to_string();

    let cfg = Config::from_lookup(lookup(&[(CONFIG_FILE_ENV, path_str.as_str()), (PORT_ENV, "7001")])).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(cfg.port, 7001);
    assert_eq!(cfg.backends, vec!["http://file.internal"]);
}

#[test]
fn test_config_missing_file() {
    let err = Config::from_lookup(lookup(&[(CONFIG_FILE_ENV, "/nonexistent/roundabout.yaml")]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn test_config_rejects_zero_timeout() {
    let err = Config::from_lookup(lookup(&[(CONNECT_TIMEOUT_ENV, "0")])).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::InvalidValue { key: CONNECT_TIMEOUT_ENV, .. }
    ));
}
