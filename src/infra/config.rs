//! Configuration loading from TOML files
//!
//! Config file is selected via the --config command line argument
//! (default: config/default.toml). Cameras are declared as [[cameras]]
//! tables; everything else has working defaults for a single-box setup
//! with the embedded broker.

use crate::domain::types::Camera;
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique site identifier (e.g., "laugavegur", "kringlan")
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "counting".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Subscribe filter for frame batches; the camera id is the second
    /// topic segment
    #[serde(default = "default_frames_topic")]
    pub frames_topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_frames_topic() -> String {
    "cameras/+/frames".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            frames_topic: default_frames_topic(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_enabled")]
    pub enabled: bool,
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
}

fn default_broker_enabled() -> bool {
    true
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: default_broker_enabled(),
            bind_address: default_broker_bind_address(),
            port: default_broker_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_bind_address")]
    pub bind_address: String,
    /// HTTP API + metrics port (0 to disable)
    #[serde(default = "default_http_port")]
    pub port: u16,
}

fn default_http_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { bind_address: default_http_bind_address(), port: default_http_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CountingConfig {
    /// Trajectory retention window (ms)
    #[serde(default = "default_retention_ms")]
    pub retention_ms: u64,
    /// Per-camera worker queue depth
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long a submitter may wait for queue space before the batch is
    /// rejected (ms)
    #[serde(default = "default_submit_deadline_ms")]
    pub submit_deadline_ms: u64,
    /// Stale-trajectory sweep tick (ms)
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

fn default_retention_ms() -> u64 {
    5000
}

fn default_queue_capacity() -> usize {
    64
}

fn default_submit_deadline_ms() -> u64 {
    200
}

fn default_sweep_interval_ms() -> u64 {
    1000
}

impl Default for CountingConfig {
    fn default() -> Self {
        Self {
            retention_ms: default_retention_ms(),
            queue_capacity: default_queue_capacity(),
            submit_deadline_ms: default_submit_deadline_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// File path for occupancy snapshots (JSONL format)
    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: String,
    /// Upper bound on one snapshot upsert (ms)
    #[serde(default = "default_persist_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_snapshot_file() -> String {
    "occupancy.jsonl".to_string()
}

fn default_persist_timeout_ms() -> u64 {
    2000
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self { snapshot_file: default_snapshot_file(), timeout_ms: default_persist_timeout_ms() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

fn default_metrics_interval_secs() -> u64 {
    10
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttEgressConfig {
    /// Enable MQTT egress publishing
    #[serde(default = "default_mqtt_egress_enabled")]
    pub enabled: bool,
    /// Topic for confirmed crossings (QoS 1)
    #[serde(default = "default_crossings_topic")]
    pub crossings_topic: String,
    /// Topic for occupancy updates (QoS 0)
    #[serde(default = "default_occupancy_topic")]
    pub occupancy_topic: String,
    /// Topic for periodic metrics snapshots (QoS 0)
    #[serde(default = "default_egress_metrics_topic")]
    pub metrics_topic: String,
    /// Interval for publishing metrics (seconds)
    #[serde(default = "default_metrics_publish_interval")]
    pub metrics_publish_interval_secs: u64,
}

fn default_mqtt_egress_enabled() -> bool {
    true
}

fn default_crossings_topic() -> String {
    "counting/crossings".to_string()
}

fn default_occupancy_topic() -> String {
    "counting/occupancy".to_string()
}

fn default_egress_metrics_topic() -> String {
    "counting/metrics".to_string()
}

fn default_metrics_publish_interval() -> u64 {
    5
}

impl Default for MqttEgressConfig {
    fn default() -> Self {
        Self {
            enabled: default_mqtt_egress_enabled(),
            crossings_topic: default_crossings_topic(),
            occupancy_topic: default_occupancy_topic(),
            metrics_topic: default_egress_metrics_topic(),
            metrics_publish_interval_secs: default_metrics_publish_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub counting: CountingConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub mqtt_egress: MqttEgressConfig,
    #[serde(default)]
    pub cameras: Vec<Camera>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    mqtt_host: String,
    mqtt_port: u16,
    frames_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    broker_enabled: bool,
    broker_bind_address: String,
    broker_port: u16,
    http_bind_address: String,
    http_port: u16,
    retention_ms: u64,
    queue_capacity: usize,
    submit_deadline_ms: u64,
    sweep_interval_ms: u64,
    snapshot_file: String,
    persist_timeout_ms: u64,
    metrics_interval_secs: u64,
    mqtt_egress_enabled: bool,
    mqtt_egress_crossings_topic: String,
    mqtt_egress_occupancy_topic: String,
    mqtt_egress_metrics_topic: String,
    mqtt_egress_metrics_interval_secs: u64,
    cameras: Vec<Camera>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            mqtt_host: default_mqtt_host(),
            mqtt_port: default_mqtt_port(),
            frames_topic: default_frames_topic(),
            mqtt_username: None,
            mqtt_password: None,
            broker_enabled: true,
            broker_bind_address: default_broker_bind_address(),
            broker_port: default_broker_port(),
            http_bind_address: default_http_bind_address(),
            http_port: default_http_port(),
            retention_ms: default_retention_ms(),
            queue_capacity: default_queue_capacity(),
            submit_deadline_ms: default_submit_deadline_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            snapshot_file: default_snapshot_file(),
            persist_timeout_ms: default_persist_timeout_ms(),
            metrics_interval_secs: default_metrics_interval_secs(),
            mqtt_egress_enabled: default_mqtt_egress_enabled(),
            mqtt_egress_crossings_topic: default_crossings_topic(),
            mqtt_egress_occupancy_topic: default_occupancy_topic(),
            mqtt_egress_metrics_topic: default_egress_metrics_topic(),
            mqtt_egress_metrics_interval_secs: default_metrics_publish_interval(),
            cameras: Vec::new(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self {
            site_id: toml_config.site.id,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            frames_topic: toml_config.mqtt.frames_topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            broker_enabled: toml_config.broker.enabled,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
            http_bind_address: toml_config.http.bind_address,
            http_port: toml_config.http.port,
            retention_ms: toml_config.counting.retention_ms,
            queue_capacity: toml_config.counting.queue_capacity,
            submit_deadline_ms: toml_config.counting.submit_deadline_ms,
            sweep_interval_ms: toml_config.counting.sweep_interval_ms,
            snapshot_file: toml_config.persistence.snapshot_file,
            persist_timeout_ms: toml_config.persistence.timeout_ms,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            mqtt_egress_enabled: toml_config.mqtt_egress.enabled,
            mqtt_egress_crossings_topic: toml_config.mqtt_egress.crossings_topic,
            mqtt_egress_occupancy_topic: toml_config.mqtt_egress.occupancy_topic,
            mqtt_egress_metrics_topic: toml_config.mqtt_egress.metrics_topic,
            mqtt_egress_metrics_interval_secs: toml_config
                .mqtt_egress
                .metrics_publish_interval_secs,
            cameras: toml_config.cameras,
            config_file: path.display().to_string(),
        })
    }

    /// Look up a declared camera by id
    pub fn camera(&self, camera_id: &str) -> Option<&Camera> {
        self.cameras.iter().find(|c| c.id == camera_id)
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn frames_topic(&self) -> &str {
        &self.frames_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn broker_enabled(&self) -> bool {
        self.broker_enabled
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker_bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn http_bind_address(&self) -> &str {
        &self.http_bind_address
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn retention_ms(&self) -> u64 {
        self.retention_ms
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn submit_deadline_ms(&self) -> u64 {
        self.submit_deadline_ms
    }

    pub fn sweep_interval_ms(&self) -> u64 {
        self.sweep_interval_ms
    }

    pub fn snapshot_file(&self) -> &str {
        &self.snapshot_file
    }

    pub fn persist_timeout_ms(&self) -> u64 {
        self.persist_timeout_ms
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn mqtt_egress_enabled(&self) -> bool {
        self.mqtt_egress_enabled
    }

    pub fn mqtt_egress_crossings_topic(&self) -> &str {
        &self.mqtt_egress_crossings_topic
    }

    pub fn mqtt_egress_occupancy_topic(&self) -> &str {
        &self.mqtt_egress_occupancy_topic
    }

    pub fn mqtt_egress_metrics_topic(&self) -> &str {
        &self.mqtt_egress_metrics_topic
    }

    pub fn mqtt_egress_metrics_interval_secs(&self) -> u64 {
        self.mqtt_egress_metrics_interval_secs
    }

    pub fn cameras(&self) -> &[Camera] {
        &self.cameras
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to declare cameras
    #[cfg(test)]
    pub fn with_cameras(mut self, cameras: Vec<Camera>) -> Self {
        self.cameras = cameras;
        self
    }

    /// Builder method for tests to shrink the worker queue
    #[cfg(test)]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Builder method for tests to set the submit deadline
    #[cfg(test)]
    pub fn with_submit_deadline_ms(mut self, ms: u64) -> Self {
        self.submit_deadline_ms = ms;
        self
    }
}
