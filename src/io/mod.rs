//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `mqtt` - MQTT client for receiving camera frame batches
//! - `mqtt_egress` - MQTT publisher for egress events
//! - `egress_channel` - Typed channel for MQTT egress messages
//! - `snapshot` - Occupancy snapshot persistence (JSONL format)
//! - `http` - HTTP API for frame submission, occupancy queries, and metrics

pub mod egress_channel;
pub mod http;
pub mod mqtt;
pub mod mqtt_egress;
pub mod snapshot;

// Re-export commonly used types
pub use egress_channel::{create_egress_channel, EgressSender};
pub use mqtt_egress::MqttPublisher;
pub use snapshot::{JsonlSnapshotStore, SnapshotStore};
