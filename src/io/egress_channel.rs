//! Typed channel for MQTT egress messages
//!
//! Provides a non-blocking way to hand events to the MQTT publisher.
//! Uses bounded mpsc channels to prevent unbounded memory growth.

use crate::domain::types::CrossingEvent;
use crate::infra::clock::epoch_ms;
use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_NUM_BUCKETS};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum EgressMessage {
    /// Confirmed line crossing
    Crossing(CrossingPayload),
    /// Occupancy update after a batch with crossings
    Occupancy(OccupancyPayload),
    /// Periodic metrics snapshot
    Metrics(MetricsPayload),
}

/// Payload for confirmed crossings
#[derive(Debug, Clone, Serialize)]
pub struct CrossingPayload {
    /// Site identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// Camera the crossing was observed on
    pub cam: String,
    /// Crossing event id (UUIDv7)
    pub id: String,
    /// Track ID from the detector
    pub tid: i64,
    /// Event type (entry, exit)
    pub t: String,
    /// Crossing position (foot point)
    pub x: f64,
    pub y: f64,
    /// Compass heading of travel (up, down, left, right)
    pub dir: String,
    /// Timestamp (epoch ms)
    pub ts: u64,
}

/// Payload for occupancy updates
#[derive(Debug, Clone, Serialize)]
pub struct OccupancyPayload {
    /// Site identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// Camera identifier
    pub cam: String,
    /// Current occupancy (clamped at zero)
    pub occupancy: u64,
    /// Lifetime entry count
    pub entries: u64,
    /// Lifetime exit count
    pub exits: u64,
    /// Occupancy as a percentage of max capacity, if configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pct: Option<u32>,
    /// Timestamp (epoch ms)
    pub ts: u64,
}

/// Payload for metrics snapshot
#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    /// Site identifier
    pub site: String,
    /// Timestamp (epoch ms)
    pub ts: u64,
    /// Total frame batches processed
    pub batches_total: u64,
    /// Batches per second
    pub batches_per_sec: f64,
    /// Average batch processing latency (microseconds)
    pub avg_latency_us: u64,
    /// Max batch processing latency (microseconds)
    pub max_latency_us: u64,
    /// Batch latency histogram buckets (Prometheus-style exponential)
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; METRICS_NUM_BUCKETS],
    /// 50th percentile latency (µs)
    pub lat_p50_us: u64,
    /// 95th percentile latency (µs)
    pub lat_p95_us: u64,
    /// 99th percentile latency (µs)
    pub lat_p99_us: u64,
    /// Lifetime entry count across all cameras
    pub entries_total: u64,
    /// Lifetime exit count across all cameras
    pub exits_total: u64,
    /// Cameras with a running worker
    pub active_cameras: usize,
    /// Active tracks across all cameras
    pub active_tracks: u64,
    /// Frame messages received on MQTT ingest
    pub frames_received: u64,
    /// Frame messages dropped due to worker queue full
    pub frames_dropped: u64,
    /// HTTP batch submissions rejected at the submit deadline
    pub batches_rejected: u64,
    /// Occupancy snapshots written
    pub snapshots_written: u64,
    /// Occupancy snapshot failures or timeouts
    pub persist_failures: u64,
    /// 99th percentile frame job queue delay (µs)
    pub queue_delay_p99_us: u64,
}

impl MetricsPayload {
    /// Create a metrics payload from a summary with site info
    pub fn from_summary(summary: MetricsSummary, site: String) -> Self {
        Self {
            site,
            ts: epoch_ms(),
            batches_total: summary.batches_total,
            batches_per_sec: summary.batches_per_sec,
            avg_latency_us: summary.avg_process_latency_us,
            max_latency_us: summary.max_process_latency_us,
            lat_buckets: summary.lat_buckets,
            lat_p50_us: summary.lat_p50_us,
            lat_p95_us: summary.lat_p95_us,
            lat_p99_us: summary.lat_p99_us,
            entries_total: summary.entries_total,
            exits_total: summary.exits_total,
            active_cameras: summary.active_cameras,
            active_tracks: summary.active_tracks_total,
            frames_received: summary.frames_received,
            frames_dropped: summary.frames_dropped,
            batches_rejected: summary.batches_rejected,
            snapshots_written: summary.snapshots_written,
            persist_failures: summary.persist_failures,
            queue_delay_p99_us: summary.queue_delay_p99_us,
        }
    }
}

/// Sender handle for egress messages
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, messages are dropped and counted.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    site_id: String,
    metrics: Arc<Metrics>,
}

impl EgressSender {
    /// Create a new sender from an mpsc sender
    pub fn new(tx: mpsc::Sender<EgressMessage>, site_id: String, metrics: Arc<Metrics>) -> Self {
        Self { tx, site_id, metrics }
    }

    /// Send a confirmed crossing for publishing
    /// Injects site_id into the payload
    pub fn send_crossing(&self, camera_id: &str, event: &CrossingEvent) {
        let payload = CrossingPayload {
            site: Some(self.site_id.clone()),
            cam: camera_id.to_string(),
            id: event.id.clone(),
            tid: event.track_id.0,
            t: event.kind.as_str().to_string(),
            x: event.position.x,
            y: event.position.y,
            dir: event.direction.as_str().to_string(),
            ts: event.ts,
        };
        self.try_send(EgressMessage::Crossing(payload));
    }

    /// Send an occupancy update
    /// Injects site_id into the payload
    pub fn send_occupancy(&self, mut payload: OccupancyPayload) {
        payload.site = Some(self.site_id.clone());
        self.try_send(EgressMessage::Occupancy(payload));
    }

    /// Send a metrics snapshot
    pub fn send_metrics(&self, summary: MetricsSummary) {
        let payload = MetricsPayload::from_summary(summary, self.site_id.clone());
        self.try_send(EgressMessage::Metrics(payload));
    }

    /// Use try_send to avoid blocking - drop and count if channel full
    fn try_send(&self, message: EgressMessage) {
        self.metrics.record_egress_received();
        if self.tx.try_send(message).is_err() {
            self.metrics.record_egress_dropped();
            let dropped = self.metrics.egress_dropped();
            if dropped % 100 == 1 {
                warn!(dropped_total = %dropped, "egress_channel_full");
            }
        }
    }
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
/// Buffer size determines how many messages can be queued.
/// site_id is injected into payloads for downstream consumers.
pub fn create_egress_channel(
    buffer_size: usize,
    site_id: String,
    metrics: Arc<Metrics>,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, site_id, metrics), rx)
}
