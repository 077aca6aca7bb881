use drive_upload::config::UploadConfig;
use drive_upload::{BackoffStrategy, ConflictBehavior};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(yaml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_demo_config() {
    let config = UploadConfig::from_file("demos/drive_upload.yaml");
    assert!(config.is_ok(), "Failed to load demo config: {:?}", config.err());

    let config = config.unwrap();
    assert_eq!(config.remote.root_folder, "uploads");
    assert!(config.remote.token_expiry.is_some());
    assert_eq!(config.policy.chunk_size, 0);
    assert_eq!(config.policy.worker_count, 1);
    assert_eq!(config.policy.max_retries, 3);
    assert_eq!(config.policy.backoff, BackoffStrategy::Fixed);
    assert_eq!(config.policy.conflict_behavior, ConflictBehavior::Replace);
    assert!(config.policy.verify_hash);
}

#[test]
fn test_load_minimal_config() {
    let file = write_config(
        r#"
remote:
  access_token: "token"
"#,
    );

    let config = UploadConfig::from_file(file.path());
    assert!(config.is_ok());

    let config = config.unwrap();
    // Check defaults are applied
    assert_eq!(config.remote.graph_endpoint, "https://graph.microsoft.com/v1.0");
    assert_eq!(config.policy.worker_count, 1);
    assert_eq!(config.policy.max_retries, 3);
    assert_eq!(config.policy.retry_delay_ms, 5_000);
    assert_eq!(config.policy.hash_retries, 5);
    assert_eq!(config.policy.hash_retry_delay_ms, 10_000);
    assert_eq!(config.policy.request_timeout_ms, 120_000);
}

#[test]
fn test_load_invalid_config() {
    let file = write_config(
        r#"
remote:
  access_token: "token"
policy:
  worker_count: 0
"#,
    );

    let config = UploadConfig::from_file(file.path());
    assert!(config.is_err(), "Should fail validation for worker_count = 0");
}

#[test]
fn test_refresh_token_requires_client_id() {
    let file = write_config(
        r#"
remote:
  refresh_token: "refresh"
"#,
    );

    assert!(UploadConfig::from_file(file.path()).is_err());
}

#[test]
fn test_load_nonexistent_file() {
    let config = UploadConfig::from_file("nonexistent.yaml");
    assert!(config.is_err(), "Should fail when file doesn't exist");
}
