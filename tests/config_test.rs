//! Integration tests for configuration loading

use counting_gateway::domain::types::EntryDirection;
use counting_gateway::infra::Config;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "test-site"

[mqtt]
host = "test-host"
port = 1884
frames_topic = "site/+/frames"

[broker]
enabled = false

[http]
port = 9090

[counting]
retention_ms = 3000
queue_capacity = 16

[persistence]
snapshot_file = "/tmp/test-occupancy.jsonl"
timeout_ms = 500

[metrics]
interval_secs = 15

[mqtt_egress]
enabled = false

[[cameras]]
id = "cam-a"
entry_direction = "left_to_right"
max_capacity = 50

[cameras.calibration_line]
x1 = 100.0
y1 = 0.0
x2 = 100.0
y2 = 480.0

[[cameras]]
id = "cam-b"
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "test-site");
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.frames_topic(), "site/+/frames");
    assert!(!config.broker_enabled());
    assert_eq!(config.http_port(), 9090);
    assert_eq!(config.retention_ms(), 3000);
    assert_eq!(config.queue_capacity(), 16);
    // Unset keys keep their defaults
    assert_eq!(config.submit_deadline_ms(), 200);
    assert_eq!(config.sweep_interval_ms(), 1000);
    assert_eq!(config.snapshot_file(), "/tmp/test-occupancy.jsonl");
    assert_eq!(config.persist_timeout_ms(), 500);
    assert_eq!(config.metrics_interval_secs(), 15);
    assert!(!config.mqtt_egress_enabled());

    assert_eq!(config.cameras().len(), 2);
    let cam_a = config.camera("cam-a").unwrap();
    assert_eq!(cam_a.entry_direction, EntryDirection::LeftToRight);
    assert_eq!(cam_a.max_capacity, Some(50));
    let line = cam_a.calibration_line.expect("cam-a should be calibrated");
    assert_eq!(line.x1, 100.0);
    assert_eq!(line.y2, 480.0);

    let cam_b = config.camera("cam-b").unwrap();
    assert!(cam_b.calibration_line.is_none());
    assert_eq!(cam_b.entry_direction, EntryDirection::UpToDown);
    assert_eq!(cam_b.max_capacity, None);

    assert!(config.camera("cam-c").is_none());
}

#[test]
fn test_missing_config_file_is_an_error() {
    let err = Config::from_file("/nonexistent/config.toml").unwrap_err();
    assert!(err.to_string().contains("/nonexistent/config.toml"));
}

#[test]
fn test_invalid_toml_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[counting\nretention_ms = 5000").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
}
