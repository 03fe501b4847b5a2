//! MQTT client for receiving camera frame batches
//!
//! Subscribes to the frames topic (default `cameras/+/frames`); the camera
//! id is taken from the second topic segment. Batches are handed to the
//! owning camera worker with try_send so a slow camera cannot stall the
//! MQTT eventloop.

use crate::domain::types::FrameBatch;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::counter_worker::CameraWorkers;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Extract the camera id from a `cameras/{camera_id}/frames` topic
fn camera_id_from_topic(topic: &str) -> Option<&str> {
    let mut parts = topic.split('/');
    if parts.next()? != "cameras" {
        return None;
    }
    let camera_id = parts.next()?;
    if camera_id.is_empty() {
        return None;
    }
    if parts.next()? != "frames" {
        return None;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(camera_id)
}

/// Parse a frame batch payload
pub fn parse_frame_batch(json_str: &str) -> Option<FrameBatch> {
    match serde_json::from_str::<FrameBatch>(json_str) {
        Ok(batch) => Some(batch),
        Err(e) => {
            debug!(error = %e, "frame_batch_parse_failed");
            None
        }
    }
}

/// Start the MQTT ingest client
///
/// Batches are submitted detached: full worker queues drop the batch,
/// count it, and keep the eventloop moving.
pub async fn start_mqtt_ingest(
    config: &Config,
    workers: Arc<CameraWorkers>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("counting-ingest-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    // Set credentials if configured
    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.frames_topic(), QoS::AtMostOnce).await?;

    info!(
        topic = %config.frames_topic(),
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        "mqtt_ingest_subscribed"
    );

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_ingest_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        metrics.record_frame_received();

                        let Some(camera_id) = camera_id_from_topic(&publish.topic) else {
                            debug!(topic = %publish.topic, "mqtt_topic_ignored");
                            continue;
                        };

                        let json_str = match std::str::from_utf8(&publish.payload) {
                            Ok(json_str) => json_str,
                            Err(e) => {
                                warn!(topic = %publish.topic, error = %e, "mqtt_payload_not_utf8");
                                continue;
                            }
                        };

                        let Some(batch) = parse_frame_batch(json_str) else {
                            continue;
                        };

                        debug!(
                            camera_id = %camera_id,
                            detections = %batch.detections.len(),
                            "frame_batch_received"
                        );
                        if workers.submit_detached(camera_id, batch).is_err() {
                            debug!(camera_id = %camera_id, "frames_for_unknown_camera");
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_ingest_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_ingest_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_id_from_topic() {
        assert_eq!(camera_id_from_topic("cameras/cam-entrance/frames"), Some("cam-entrance"));
        assert_eq!(camera_id_from_topic("cameras/1/frames"), Some("1"));

        assert_eq!(camera_id_from_topic("sensors/cam-entrance/frames"), None);
        assert_eq!(camera_id_from_topic("cameras/cam-entrance/events"), None);
        assert_eq!(camera_id_from_topic("cameras//frames"), None);
        assert_eq!(camera_id_from_topic("cameras/cam-entrance"), None);
        assert_eq!(camera_id_from_topic("cameras/cam-entrance/frames/extra"), None);
    }

    #[test]
    fn test_parse_frame_batch() {
        let json = r#"{
            "ts": 1736012345678,
            "detections": [
                {
                    "class": "person",
                    "track_id": 42,
                    "confidence": 0.92,
                    "bbox": {"x": 80.0, "y": 150.0, "width": 40.0, "height": 110.0}
                },
                {
                    "class": "person",
                    "bbox": {"x": 200.0, "y": 100.0, "width": 35.0}
                }
            ]
        }"#;

        let batch = parse_frame_batch(json).expect("valid batch");
        assert_eq!(batch.ts, Some(1736012345678));
        assert_eq!(batch.detections.len(), 2);
        assert_eq!(batch.detections[0].track_id, Some(42));
        assert!(batch.detections[0].is_person());
        // Partial bbox parses; the missing height is handled downstream
        assert!(batch.detections[1].bbox.as_ref().unwrap().height.is_none());
    }

    #[test]
    fn test_parse_batch_without_ts() {
        let batch = parse_frame_batch(r#"{"detections": []}"#).expect("valid batch");
        assert_eq!(batch.ts, None);
        assert!(batch.detections.is_empty());
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(parse_frame_batch("not json").is_none());
        assert!(parse_frame_batch(r#"{"detections": 5}"#).is_none());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let json = r#"{
            "detections": [{"class": "person", "pose": "standing"}],
            "frame_number": 991
        }"#;
        let batch = parse_frame_batch(json).expect("valid batch");
        assert_eq!(batch.detections.len(), 1);
    }
}
