//! Configuration loading tests

use std::time::Duration;

use deployer::config::Config;
use deployer::errors::DeployerError;
use deployer::filesys::file::File;

const FULL: &str = r#"{
    "log_level": "debug",
    "server": { "host": "127.0.0.1", "port": 9090 },
    "workers": { "count": 4, "heartbeat_interval_secs": 5 },
    "lease_expiry_secs": 30,
    "retention_secs": 86400,
    "state_dir": "/tmp/deployer-state",
    "trigger_secret": "s3cret",
    "notify_url": "https://hooks.example.com/deployments",
    "targets": [
        {
            "name": "staging",
            "image_pattern": "registry.local/app:*",
            "container_name": "app-staging",
            "health_check_url": "http://127.0.0.1:8081",
            "health_check_path": "ready",
            "max_attempts": 2,
            "backoff_base_secs": 1,
            "backoff_max_secs": 4,
            "setup_command": ["./migrate", "--yes"]
        }
    ]
}"#;

fn expect_config_error(json: &str) {
    match Config::from_json(json) {
        Err(DeployerError::ConfigError(_)) => {}
        other => panic!("expected config error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_full_config() {
    let config = Config::from_json(FULL).unwrap();
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.worker_count, 4);
    assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
    assert_eq!(config.lease_expiry, Duration::from_secs(30));
    assert_eq!(config.retention, Some(Duration::from_secs(86400)));
    assert!(config.notify_url.is_some());

    let staging = config.target_by_name("staging").unwrap();
    assert_eq!(staging.container_name, "app-staging");
    assert_eq!(staging.health_check_path, "/ready");
    assert_eq!(staging.retry.max_attempts, 2);
    assert_eq!(staging.retry.backoff_for(1), Duration::from_secs(1));
    assert_eq!(staging.retry.backoff_for(5), Duration::from_secs(4));
    assert_eq!(
        staging.health_endpoint().unwrap().as_str(),
        "http://127.0.0.1:8081/ready"
    );
    assert_eq!(
        staging.setup_command.as_deref(),
        Some(&["./migrate".to_string(), "--yes".to_string()][..])
    );
}

#[test]
fn test_invalid_configs_are_rejected() {
    // heartbeat not shorter than lease expiry
    expect_config_error(
        r#"{"trigger_secret": "s", "lease_expiry_secs": 10, "workers": {"heartbeat_interval_secs": 10}, "targets": []}"#,
    );
    // missing secret
    expect_config_error(r#"{"targets": [{"name": "a", "image_pattern": "app:*"}]}"#);
    // duplicate target
    expect_config_error(
        r#"{"trigger_secret": "s", "targets": [
            {"name": "a", "image_pattern": "app:*"},
            {"name": "a", "image_pattern": "app:*"}
        ]}"#,
    );
    // zero attempts
    expect_config_error(
        r#"{"trigger_secret": "s", "targets": [{"name": "a", "image_pattern": "app:*", "max_attempts": 0}]}"#,
    );
    // missing pattern
    expect_config_error(r#"{"trigger_secret": "s", "targets": [{"name": "a"}]}"#);
    // bad url
    expect_config_error(r#"{"trigger_secret": "s", "notify_url": "not a url", "targets": []}"#);
    // not json
    expect_config_error("{");
}

#[tokio::test]
async fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = File::new(dir.path().join("config.json"));
    file.write_atomic(FULL.as_bytes()).await.unwrap();

    let config = Config::load(&file).await.unwrap();
    assert_eq!(config.targets().count(), 1);

    let missing = File::new(dir.path().join("missing.json"));
    assert!(matches!(
        Config::load(&missing).await,
        Err(DeployerError::ConfigError(_))
    ));
}
