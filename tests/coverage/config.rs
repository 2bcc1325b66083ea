use obsctl::{
    ControllerConfig, DEFAULT_SPAWNER_PORT, RegistryConfig, RetryPolicy, ServiceAddress,
    SpawnerConfig,
};
use std::time::Duration;

#[test]
fn test_registry_config_defaults() {
    let config = RegistryConfig::default();
    assert_eq!(config.retry, RetryPolicy::default());
    assert_eq!(config.tick_interval, Duration::from_secs(1));
    assert_eq!(config.spawner_port, DEFAULT_SPAWNER_PORT);
    assert!(config.spawners.is_empty());
}

#[test]
fn test_spawner_address_per_host() {
    let config = RegistryConfig::default()
        .with_spawner("node002", ServiceAddress::Unix("/tmp/node002.sock".to_string()));

    assert_eq!(
        config.spawner_address("node001"),
        ServiceAddress::Tcp("node001:24001".to_string())
    );
    assert_eq!(
        config.spawner_address("node002"),
        ServiceAddress::Unix("/tmp/node002.sock".to_string())
    );
}

#[test]
fn test_registry_config_partial_json() {
    let json = r#"{
        "departed_history": 8,
        "retry": { "max_retries": 2 },
        "spawners": { "node003": { "Tcp": "10.1.0.3:24001" } }
    }"#;
    let config: RegistryConfig = serde_json::from_str(json).unwrap();

    assert_eq!(config.departed_history, 8);
    assert_eq!(config.retry.max_retries, 2);
    assert_eq!(config.retry.interval, Duration::from_secs(5));
    assert_eq!(config.tick_interval, Duration::from_secs(1));
    assert_eq!(
        config.spawner_address("node003"),
        ServiceAddress::Tcp("10.1.0.3:24001".to_string())
    );
}

#[test]
fn test_spawner_config_builders() {
    let config = SpawnerConfig::default()
        .with_announce_timeout(Duration::from_secs(3))
        .with_search_path("/opt/obs/bin")
        .with_search_path("/usr/local/bin");
    assert_eq!(config.announce_timeout, Duration::from_secs(3));
    assert_eq!(config.search_paths.len(), 2);

    let parsed: SpawnerConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(parsed.announce_timeout, Duration::from_secs(20));
}

#[test]
fn test_controller_config_reconnect() {
    let config = ControllerConfig::default();
    assert_eq!(config.reconnect.interval, Duration::from_secs(2));
    assert_eq!(config.reconnect.max_retries, 10);

    let config = config.with_reconnect(RetryPolicy::new(Duration::from_millis(100), 1));
    let json = serde_json::to_string(&config).unwrap();
    let parsed: ControllerConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.reconnect, RetryPolicy::new(Duration::from_millis(100), 1));
}
