//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering on purpose. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Maximum number of cameras with dedicated gauge slots
pub const MAX_CAMERAS: usize = 16;

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Total frame batches ever processed (monotonic)
    batches_total: AtomicU64,
    /// Batches since last report (reset on report)
    batches_since_report: AtomicU64,
    /// Sum of batch processing latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max batch processing latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Batch processing latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Total detections seen across all batches (monotonic)
    detections_total: AtomicU64,
    /// Person detections with a usable position (monotonic)
    persons_total: AtomicU64,
    /// Detections skipped for missing bbox fields (monotonic)
    detections_skipped_total: AtomicU64,
    /// Confirmed entry crossings (monotonic)
    entries_total: AtomicU64,
    /// Confirmed exit crossings (monotonic)
    exits_total: AtomicU64,
    /// Frame messages received on MQTT ingest, before try_send (monotonic)
    frames_received: AtomicU64,
    /// Frame messages dropped due to worker queue full (monotonic)
    frames_dropped: AtomicU64,
    /// HTTP batch submissions rejected after the submit deadline (monotonic)
    batches_rejected: AtomicU64,
    /// Egress messages attempted, before try_send (monotonic)
    egress_received: AtomicU64,
    /// Egress messages dropped due to channel full (monotonic)
    egress_dropped: AtomicU64,
    /// Occupancy snapshots written (monotonic)
    snapshots_written: AtomicU64,
    /// Occupancy snapshot failures or timeouts (monotonic)
    persist_failures: AtomicU64,
    /// Frame job queue delay histogram (time from enqueue to worker pickup)
    /// Same buckets as latency: 100, 200, 400, ... 51200 µs
    queue_delay_buckets: [AtomicU64; NUM_BUCKETS],
    /// Sum of queue delays (reset on report)
    queue_delay_sum_us: AtomicU64,
    /// Max queue delay (reset on report)
    queue_delay_max_us: AtomicU64,
    /// Per-camera occupancy gauges (updated by workers)
    /// Index is determined by order in the cameras config
    camera_occupancy: [AtomicU64; MAX_CAMERAS],
    /// Per-camera active track gauges (updated by workers)
    camera_tracks: [AtomicU64; MAX_CAMERAS],
    /// Camera IDs for gauge slots (set once at init)
    camera_ids: parking_lot::Mutex<Vec<String>>,
    /// Pre-computed camera ID to index mapping (for O(1) lookup without mutex)
    camera_id_to_index: parking_lot::RwLock<FxHashMap<String, usize>>,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            batches_total: AtomicU64::new(0),
            batches_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            detections_total: AtomicU64::new(0),
            persons_total: AtomicU64::new(0),
            detections_skipped_total: AtomicU64::new(0),
            entries_total: AtomicU64::new(0),
            exits_total: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            batches_rejected: AtomicU64::new(0),
            egress_received: AtomicU64::new(0),
            egress_dropped: AtomicU64::new(0),
            snapshots_written: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
            queue_delay_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            queue_delay_sum_us: AtomicU64::new(0),
            queue_delay_max_us: AtomicU64::new(0),
            camera_occupancy: std::array::from_fn(|_| AtomicU64::new(0)),
            camera_tracks: std::array::from_fn(|_| AtomicU64::new(0)),
            camera_ids: parking_lot::Mutex::new(Vec::new()),
            camera_id_to_index: parking_lot::RwLock::new(FxHashMap::default()),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Set the camera IDs with gauge slots (call once at initialization)
    pub fn set_cameras(&self, camera_ids: &[String]) {
        // Update the camera list (for reporting)
        let mut cameras = self.camera_ids.lock();
        cameras.clear();
        cameras.extend(camera_ids.iter().take(MAX_CAMERAS).cloned());

        // Pre-compute the camera ID to index mapping for O(1) lookup
        let mut index_map = self.camera_id_to_index.write();
        index_map.clear();
        for (idx, camera_id) in camera_ids.iter().take(MAX_CAMERAS).enumerate() {
            index_map.insert(camera_id.clone(), idx);
        }
    }

    /// Get the gauge slot for a camera ID, or None if not declared
    #[inline]
    fn camera_index(&self, camera_id: &str) -> Option<usize> {
        let index_map = self.camera_id_to_index.read();
        index_map.get(camera_id).copied()
    }

    /// Set current occupancy for a camera (called by its worker)
    #[inline]
    pub fn set_camera_occupancy(&self, camera_id: &str, occupancy: u64) {
        if let Some(idx) = self.camera_index(camera_id) {
            self.camera_occupancy[idx].store(occupancy, Ordering::Relaxed);
        }
    }

    /// Set current active track count for a camera (called by its worker)
    #[inline]
    pub fn set_camera_tracks(&self, camera_id: &str, tracks: u64) {
        if let Some(idx) = self.camera_index(camera_id) {
            self.camera_tracks[idx].store(tracks, Ordering::Relaxed);
        }
    }

    /// Current (occupancy, active tracks) gauges for all declared cameras
    pub fn camera_gauges(&self) -> Vec<(String, u64, u64)> {
        let cameras = self.camera_ids.lock();
        cameras
            .iter()
            .enumerate()
            .map(|(idx, camera_id)| {
                let occupancy = self.camera_occupancy[idx].load(Ordering::Relaxed);
                let tracks = self.camera_tracks[idx].load(Ordering::Relaxed);
                (camera_id.clone(), occupancy, tracks)
            })
            .collect()
    }

    /// Record a frame batch was processed with given latency (lock-free)
    #[inline]
    pub fn record_batch_processed(&self, latency_us: u64, detections: u64) {
        self.batches_total.fetch_add(1, Ordering::Relaxed);
        self.batches_since_report.fetch_add(1, Ordering::Relaxed);
        self.detections_total.fetch_add(detections, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        // Update histogram bucket
        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        // Update max
        update_atomic_max(&self.latency_max_us, latency_us);
    }

    /// Record a person detection with a usable position (lock-free)
    #[inline]
    pub fn record_person_observed(&self) {
        self.persons_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a detection skipped for missing bbox fields (lock-free)
    #[inline]
    pub fn record_detection_skipped(&self) {
        self.detections_skipped_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record confirmed crossings from one batch (lock-free)
    #[inline]
    pub fn record_crossings(&self, entries: u64, exits: u64) {
        if entries > 0 {
            self.entries_total.fetch_add(entries, Ordering::Relaxed);
        }
        if exits > 0 {
            self.exits_total.fetch_add(exits, Ordering::Relaxed);
        }
    }

    /// Record a frame message received on MQTT ingest (lock-free)
    #[inline]
    pub fn record_frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame message dropped due to worker queue full (lock-free)
    #[inline]
    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get frames dropped total
    #[inline]
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    /// Record an HTTP batch submission rejected at the submit deadline (lock-free)
    #[inline]
    pub fn record_batch_rejected(&self) {
        self.batches_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Get rejected batch total
    #[inline]
    pub fn batches_rejected(&self) -> u64 {
        self.batches_rejected.load(Ordering::Relaxed)
    }

    /// Record an egress message attempted (lock-free)
    #[inline]
    pub fn record_egress_received(&self) {
        self.egress_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an egress message dropped due to channel full (lock-free)
    #[inline]
    pub fn record_egress_dropped(&self) {
        self.egress_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get egress dropped total
    #[inline]
    pub fn egress_dropped(&self) -> u64 {
        self.egress_dropped.load(Ordering::Relaxed)
    }

    /// Record an occupancy snapshot written (lock-free)
    #[inline]
    pub fn record_snapshot_written(&self) {
        self.snapshots_written.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an occupancy snapshot failure or timeout (lock-free)
    #[inline]
    pub fn record_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record frame job queue delay (time from enqueue to worker pickup)
    #[inline]
    pub fn record_queue_delay(&self, delay_us: u64) {
        // Update histogram bucket
        let bucket = bucket_index(delay_us);
        self.queue_delay_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.queue_delay_sum_us.fetch_add(delay_us, Ordering::Relaxed);

        // Update max
        update_atomic_max(&self.queue_delay_max_us, delay_us);
    }

    /// Get total batches processed
    #[inline]
    pub fn batches_total(&self) -> u64 {
        self.batches_total.load(Ordering::Relaxed)
    }

    /// Get total confirmed entries
    #[inline]
    pub fn entries_total(&self) -> u64 {
        self.entries_total.load(Ordering::Relaxed)
    }

    /// Get total confirmed exits
    #[inline]
    pub fn exits_total(&self) -> u64 {
        self.exits_total.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self, active_cameras: usize) -> MetricsSummary {
        // Swap periodic counters to zero and get their values
        let batches_count = self.batches_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);

        // Swap histogram buckets and collect values
        let lat_buckets = swap_buckets(&self.latency_buckets);

        // Get monotonic counters (don't reset)
        let batches_total = self.batches_total.load(Ordering::Relaxed);
        let detections_total = self.detections_total.load(Ordering::Relaxed);
        let persons_total = self.persons_total.load(Ordering::Relaxed);
        let detections_skipped_total = self.detections_skipped_total.load(Ordering::Relaxed);
        let entries_total = self.entries_total.load(Ordering::Relaxed);
        let exits_total = self.exits_total.load(Ordering::Relaxed);

        // Calculate elapsed time and reset
        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        // Calculate derived metrics
        let batches_per_sec = if elapsed.as_secs_f64() > 0.0 {
            batches_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let avg_latency = if batches_count > 0 { latency_sum / batches_count } else { 0 };

        // Compute percentiles from histogram
        let lat_p50 = percentile_from_buckets(&lat_buckets, 0.50);
        let lat_p95 = percentile_from_buckets(&lat_buckets, 0.95);
        let lat_p99 = percentile_from_buckets(&lat_buckets, 0.99);

        // Get ingest and egress counters (don't reset)
        let frames_received = self.frames_received.load(Ordering::Relaxed);
        let frames_dropped = self.frames_dropped.load(Ordering::Relaxed);
        let frame_drop_ratio =
            if frames_received > 0 { frames_dropped as f64 / frames_received as f64 } else { 0.0 };
        let batches_rejected = self.batches_rejected.load(Ordering::Relaxed);
        let egress_received = self.egress_received.load(Ordering::Relaxed);
        let egress_dropped = self.egress_dropped.load(Ordering::Relaxed);
        let egress_drop_ratio =
            if egress_received > 0 { egress_dropped as f64 / egress_received as f64 } else { 0.0 };

        // Get persistence counters (don't reset)
        let snapshots_written = self.snapshots_written.load(Ordering::Relaxed);
        let persist_failures = self.persist_failures.load(Ordering::Relaxed);

        // Swap queue delay histogram (reset on report)
        let queue_delay_buckets = swap_buckets(&self.queue_delay_buckets);
        let queue_delay_sum = self.queue_delay_sum_us.swap(0, Ordering::Relaxed);
        let queue_delay_max = self.queue_delay_max_us.swap(0, Ordering::Relaxed);
        let queue_delay_count: u64 = queue_delay_buckets.iter().sum();
        let queue_delay_avg_us =
            if queue_delay_count > 0 { queue_delay_sum / queue_delay_count } else { 0 };
        let queue_delay_p99_us = percentile_from_buckets(&queue_delay_buckets, 0.99);

        // Sum per-camera track gauges (point-in-time)
        let active_tracks_total: u64 = {
            let cameras = self.camera_ids.lock();
            (0..cameras.len()).map(|idx| self.camera_tracks[idx].load(Ordering::Relaxed)).sum()
        };

        MetricsSummary {
            batches_total,
            batches_per_sec,
            avg_process_latency_us: avg_latency,
            max_process_latency_us: max_latency,
            lat_buckets,
            lat_p50_us: lat_p50,
            lat_p95_us: lat_p95,
            lat_p99_us: lat_p99,
            detections_total,
            persons_total,
            detections_skipped_total,
            entries_total,
            exits_total,
            frames_received,
            frames_dropped,
            frame_drop_ratio,
            batches_rejected,
            egress_received,
            egress_dropped,
            egress_drop_ratio,
            snapshots_written,
            persist_failures,
            queue_delay_buckets,
            queue_delay_avg_us,
            queue_delay_max_us: queue_delay_max,
            queue_delay_p99_us,
            active_cameras,
            active_tracks_total,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for the /metrics endpoint)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub batches_total: u64,
    pub batches_per_sec: f64,
    pub avg_process_latency_us: u64,
    pub max_process_latency_us: u64,
    /// Batch processing latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    /// 50th percentile latency (µs)
    pub lat_p50_us: u64,
    /// 95th percentile latency (µs)
    pub lat_p95_us: u64,
    /// 99th percentile latency (µs)
    pub lat_p99_us: u64,
    /// Total detections seen in processed batches
    pub detections_total: u64,
    /// Person detections with a usable position
    pub persons_total: u64,
    /// Detections skipped for missing bbox fields
    pub detections_skipped_total: u64,
    /// Total confirmed entries
    pub entries_total: u64,
    /// Total confirmed exits
    pub exits_total: u64,
    /// Frame messages received on MQTT ingest (before try_send)
    pub frames_received: u64,
    /// Frame messages dropped due to worker queue full
    pub frames_dropped: u64,
    /// Frame drop ratio (dropped / received)
    pub frame_drop_ratio: f64,
    /// HTTP batch submissions rejected at the submit deadline
    pub batches_rejected: u64,
    /// Egress messages attempted (before try_send)
    pub egress_received: u64,
    /// Egress messages dropped due to channel full
    pub egress_dropped: u64,
    /// Egress drop ratio (dropped / received)
    pub egress_drop_ratio: f64,
    /// Occupancy snapshots written
    pub snapshots_written: u64,
    /// Occupancy snapshot failures or timeouts
    pub persist_failures: u64,
    /// Frame job queue delay histogram buckets (enqueue to worker pickup)
    pub queue_delay_buckets: [u64; NUM_BUCKETS],
    /// Average queue delay (µs)
    pub queue_delay_avg_us: u64,
    /// Max queue delay (µs)
    pub queue_delay_max_us: u64,
    /// 99th percentile queue delay (µs)
    pub queue_delay_p99_us: u64,
    /// Cameras with a running worker
    pub active_cameras: usize,
    /// Sum of active tracks across all camera gauges
    pub active_tracks_total: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            batches_total = %self.batches_total,
            batches_per_sec = format!("{:.1}", self.batches_per_sec),
            avg_latency_us = %self.avg_process_latency_us,
            max_latency_us = %self.max_process_latency_us,
            p50_us = %self.lat_p50_us,
            p95_us = %self.lat_p95_us,
            p99_us = %self.lat_p99_us,
            entries_total = %self.entries_total,
            exits_total = %self.exits_total,
            active_cameras = %self.active_cameras,
            active_tracks = %self.active_tracks_total,
            frames_dropped = %self.frames_dropped,
            persist_failures = %self.persist_failures,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.batches_total(), 0);
        assert_eq!(metrics.entries_total(), 0);
        assert_eq!(metrics.exits_total(), 0);
    }

    #[test]
    fn test_record_batch() {
        let metrics = Metrics::new();

        metrics.record_batch_processed(100, 3);
        assert_eq!(metrics.batches_total(), 1);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 100);
        assert_eq!(metrics.detections_total.load(Ordering::Relaxed), 3);

        metrics.record_batch_processed(200, 1);
        assert_eq!(metrics.batches_total(), 2);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 300);
        assert_eq!(metrics.detections_total.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn test_record_crossings() {
        let metrics = Metrics::new();

        metrics.record_crossings(2, 0);
        metrics.record_crossings(0, 1);
        metrics.record_crossings(1, 1);

        assert_eq!(metrics.entries_total(), 3);
        assert_eq!(metrics.exits_total(), 2);
    }

    #[test]
    fn test_report() {
        let metrics = Metrics::new();

        metrics.record_batch_processed(100, 1);
        metrics.record_batch_processed(200, 1);
        metrics.record_batch_processed(300, 1);
        metrics.record_crossings(1, 0);

        let summary = metrics.report(2);

        assert_eq!(summary.batches_total, 3);
        assert_eq!(summary.avg_process_latency_us, 200); // (100+200+300)/3
        assert_eq!(summary.max_process_latency_us, 300);
        assert_eq!(summary.entries_total, 1);
        assert_eq!(summary.active_cameras, 2);

        // Periodic counters should be reset
        assert_eq!(metrics.batches_since_report.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.latency_max_us.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_report_empty() {
        let metrics = Metrics::new();
        let summary = metrics.report(0);

        assert_eq!(summary.batches_total, 0);
        assert_eq!(summary.avg_process_latency_us, 0);
        assert_eq!(summary.max_process_latency_us, 0);
        assert_eq!(summary.frame_drop_ratio, 0.0);
    }

    #[test]
    fn test_max_latency_tracking() {
        let metrics = Metrics::new();

        metrics.record_batch_processed(100, 0);
        metrics.record_batch_processed(500, 0);
        metrics.record_batch_processed(200, 0);
        metrics.record_batch_processed(50, 0);

        assert_eq!(metrics.latency_max_us.load(Ordering::Relaxed), 500);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        // Spawn 10 threads, each recording 1000 batches
        for _ in 0..10 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for i in 0..1000 {
                    m.record_batch_processed(i as u64, 1);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.batches_total(), 10_000);
    }

    #[test]
    fn test_bucket_index() {
        // Test bucket boundaries
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(200), 1);
        assert_eq!(bucket_index(201), 2);
        assert_eq!(bucket_index(400), 2);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10); // overflow
        assert_eq!(bucket_index(100000), 10);
    }

    #[test]
    fn test_histogram_buckets() {
        let metrics = Metrics::new();

        // Record batches in different buckets
        metrics.record_batch_processed(50, 0); // bucket 0 (≤100)
        metrics.record_batch_processed(150, 0); // bucket 1 (≤200)
        metrics.record_batch_processed(350, 0); // bucket 2 (≤400)
        metrics.record_batch_processed(60000, 0); // bucket 10 (overflow)

        let summary = metrics.report(0);

        assert_eq!(summary.lat_buckets[0], 1);
        assert_eq!(summary.lat_buckets[1], 1);
        assert_eq!(summary.lat_buckets[2], 1);
        assert_eq!(summary.lat_buckets[10], 1);
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();

        // Record 100 batches, all at 150µs (bucket 1, ≤200)
        for _ in 0..100 {
            metrics.record_batch_processed(150, 0);
        }

        let summary = metrics.report(0);

        // All percentiles should be 200 (upper bound of bucket 1)
        assert_eq!(summary.lat_p50_us, 200);
        assert_eq!(summary.lat_p95_us, 200);
        assert_eq!(summary.lat_p99_us, 200);
    }

    #[test]
    fn test_camera_gauges() {
        let metrics = Metrics::new();
        metrics.set_cameras(&["cam-entrance".to_string(), "cam-back-door".to_string()]);

        metrics.set_camera_occupancy("cam-entrance", 12);
        metrics.set_camera_tracks("cam-entrance", 3);
        metrics.set_camera_occupancy("cam-back-door", 1);
        // Unknown camera has no gauge slot
        metrics.set_camera_occupancy("cam-unknown", 99);

        let gauges = metrics.camera_gauges();
        assert_eq!(gauges.len(), 2);
        assert_eq!(gauges[0], ("cam-entrance".to_string(), 12, 3));
        assert_eq!(gauges[1], ("cam-back-door".to_string(), 1, 0));
    }

    #[test]
    fn test_drop_ratio() {
        let metrics = Metrics::new();

        for _ in 0..10 {
            metrics.record_frame_received();
        }
        metrics.record_frame_dropped();

        let summary = metrics.report(0);
        assert_eq!(summary.frames_received, 10);
        assert_eq!(summary.frames_dropped, 1);
        assert!((summary.frame_drop_ratio - 0.1).abs() < 1e-9);
    }
}
