use std::fs;

use serial_test::serial;
use tempfile::tempdir;

use super::{Settings, load_config};
use crate::broker::Broker;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.client.client_id, None);
    assert_eq!(settings.client.default_request_timeout_secs, 3600);
    assert_eq!(settings.connection.connect_retries, -1);
    assert_eq!(settings.connection.connect_timeout_secs, 10);
    assert_eq!(settings.connection.reconnect_delay_secs, 1);
    assert_eq!(settings.connection.reconnect_delay_max_secs, 60);
    assert!(settings.connection.reconnect_when_disconnected);
    assert_eq!(settings.dispatch.incoming_queue_size, 1000);
    assert_eq!(settings.dispatch.incoming_pool_size, 1);
    assert!(settings.tls.is_none());
    assert!(settings.brokers.is_empty());
}

#[test]
fn test_for_brokers_keeps_defaults() {
    let broker = Broker::new("localhost", 8883).unwrap();
    let settings = Settings::for_brokers(vec![broker.clone()]);
    assert_eq!(settings.brokers, vec![broker]);
    assert_eq!(settings.connection.connect_retries, -1);
}

#[test]
#[serial]
fn test_load_config_without_file_uses_defaults() {
    let dir = tempdir().unwrap();
    let previous = std::env::current_dir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();

    let settings = load_config().unwrap();

    std::env::set_current_dir(previous).unwrap();

    assert_eq!(settings.dispatch.incoming_queue_size, 1000);
    assert!(settings.brokers.is_empty());
}

#[test]
#[serial]
fn test_load_config_merges_partial_file() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("config")).unwrap();
    fs::write(
        dir.path().join("config/client.toml"),
        r#"
        [connection]
        connect_retries = 3
        connect_timeout_secs = 2

        [[brokers]]
        unique_id = "broker-1"
        host_name = "fabric.example.com"
        port = 9001
        "#,
    )
    .unwrap();

    let previous = std::env::current_dir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();

    let settings = load_config().unwrap();

    std::env::set_current_dir(previous).unwrap();

    // Overridden values
    assert_eq!(settings.connection.connect_retries, 3);
    assert_eq!(settings.connection.connect_timeout_secs, 2);
    assert_eq!(settings.brokers.len(), 1);
    assert_eq!(settings.brokers[0].unique_id, "broker-1");
    assert_eq!(settings.brokers[0].host_name, "fabric.example.com");
    assert_eq!(settings.brokers[0].port, 9001);
    // Untouched values keep their defaults
    assert_eq!(settings.connection.reconnect_delay_max_secs, 60);
    assert_eq!(settings.dispatch.incoming_pool_size, 1);
}
