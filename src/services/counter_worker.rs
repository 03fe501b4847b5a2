//! Per-camera counting workers
//!
//! Each declared camera gets a dedicated worker task that owns its
//! trajectory store and occupancy state, so batches for one camera are
//! processed strictly in arrival order without shared locks.
//!
//! Key behaviors:
//! - Workers spawn lazily on the first batch or query for a declared camera
//! - HTTP submissions wait up to the submit deadline for queue space, then
//!   get rejected as overloaded; MQTT submissions drop immediately
//! - A periodic tick sweeps stale trajectories even when no frames arrive
//! - Occupancy is restored from the snapshot store when a worker spawns
//! - Snapshots are persisted after each batch that produced crossings

use crate::domain::occupancy::OccupancySnapshot;
use crate::domain::types::{
    Camera, CountingError, CountingSummary, EntryDirection, FrameBatch,
};
use crate::infra::clock::Clock;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::egress_channel::{EgressSender, OccupancyPayload};
use crate::io::snapshot::SnapshotStore;
use crate::services::counter::CameraCounter;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

/// Queue delay above this is worth a warning (100ms)
const QUEUE_DELAY_WARN_US: u64 = 100_000;

/// Work items for a camera worker
#[derive(Debug)]
pub enum WorkerJob {
    /// Process a frame batch; reply is present for HTTP submissions
    Frames {
        batch: FrameBatch,
        enqueued_at: Instant,
        reply: Option<oneshot::Sender<Result<CountingSummary, CountingError>>>,
    },
    /// Report current occupancy state
    Query { reply: oneshot::Sender<OccupancyReport> },
}

/// Point-in-time occupancy state for one camera
#[derive(Debug, Clone, Serialize)]
pub struct OccupancyReport {
    pub camera_id: String,
    pub calibrated: bool,
    pub entry_direction: EntryDirection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_capacity: Option<u32>,
    pub total_entries: u64,
    pub total_exits: u64,
    pub current_occupancy: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occupancy_percent: Option<u32>,
    pub active_tracks: usize,
    pub ts: u64,
}

/// Task owning one camera's counting state
struct CameraWorker {
    counter: CameraCounter,
    job_rx: mpsc::Receiver<WorkerJob>,
    store: Arc<dyn SnapshotStore>,
    egress: Option<EgressSender>,
    metrics: Arc<Metrics>,
    clock: Clock,
    persist_timeout: Duration,
    sweep_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl CameraWorker {
    async fn run(mut self) {
        let camera_id = self.counter.camera().id.clone();

        match self.store.load_latest(&camera_id).await {
            Ok(Some(snapshot)) => {
                self.counter.restore(&snapshot);
                info!(
                    camera_id = %camera_id,
                    occupancy = %snapshot.current_occupancy,
                    entries = %snapshot.total_entries,
                    exits = %snapshot.total_exits,
                    "occupancy_restored"
                );
            }
            Ok(None) => {}
            Err(e) => {
                warn!(camera_id = %camera_id, error = %e, "snapshot_load_failed");
            }
        }
        self.publish_gauges();

        let mut sweep_tick = interval(self.sweep_interval);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!(camera_id = %camera_id, "camera_worker_shutdown");
                        return;
                    }
                }
                job = self.job_rx.recv() => {
                    let Some(job) = job else {
                        info!(camera_id = %camera_id, "camera_worker_channel_closed");
                        return;
                    };
                    self.handle_job(job).await;
                }
                _ = sweep_tick.tick() => {
                    let evicted = self.counter.sweep(self.clock.now_ms());
                    if evicted > 0 {
                        debug!(
                            camera_id = %camera_id,
                            evicted = %evicted,
                            "trajectories_swept"
                        );
                    }
                    self.publish_gauges();
                }
            }
        }
    }

    async fn handle_job(&mut self, job: WorkerJob) {
        match job {
            WorkerJob::Frames { batch, enqueued_at, reply } => {
                let queue_delay_us = enqueued_at.elapsed().as_micros() as u64;
                self.metrics.record_queue_delay(queue_delay_us);
                if queue_delay_us > QUEUE_DELAY_WARN_US {
                    warn!(
                        camera_id = %self.counter.camera().id,
                        delay_us = %queue_delay_us,
                        "frame_queue_delay_high"
                    );
                }

                let result = self.process_frames(&batch).await;
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            WorkerJob::Query { reply } => {
                let _ = reply.send(self.report());
            }
        }
    }

    async fn process_frames(&mut self, batch: &FrameBatch) -> Result<CountingSummary, CountingError> {
        let started = Instant::now();
        let now_ms = self.clock.now_ms();
        let detections = batch.detections.len() as u64;

        let summary = self.counter.process_batch(batch, now_ms)?;

        self.metrics.record_batch_processed(started.elapsed().as_micros() as u64, detections);
        self.publish_gauges();

        if !summary.crossings.is_empty() {
            let camera_id = self.counter.camera().id.clone();
            if let Some(egress) = &self.egress {
                for event in &summary.crossings {
                    egress.send_crossing(&camera_id, event);
                }
                egress.send_occupancy(OccupancyPayload {
                    site: None,
                    cam: camera_id,
                    occupancy: summary.current_occupancy,
                    entries: summary.total_entries,
                    exits: summary.total_exits,
                    pct: self
                        .counter
                        .occupancy()
                        .occupancy_percent(self.counter.camera().max_capacity),
                    ts: now_ms,
                });
            }
            // In-memory state is kept even if the write fails; the caller
            // sees the error and the next successful write catches up
            self.persist(now_ms).await?;
        }

        Ok(summary)
    }

    async fn persist(&self, now_ms: u64) -> Result<(), CountingError> {
        let camera_id = &self.counter.camera().id;
        let snapshot = OccupancySnapshot::of(camera_id, self.counter.occupancy(), now_ms);

        match timeout(self.persist_timeout, self.store.upsert(&snapshot)).await {
            Ok(Ok(())) => {
                self.metrics.record_snapshot_written();
                Ok(())
            }
            Ok(Err(e)) => {
                self.metrics.record_persist_failure();
                warn!(camera_id = %camera_id, error = %e, "snapshot_write_failed");
                Err(CountingError::Persistence(e.to_string()))
            }
            Err(_) => {
                self.metrics.record_persist_failure();
                warn!(
                    camera_id = %camera_id,
                    timeout_ms = %self.persist_timeout.as_millis(),
                    "snapshot_write_timeout"
                );
                Err(CountingError::Persistence(format!(
                    "snapshot write timed out after {}ms",
                    self.persist_timeout.as_millis()
                )))
            }
        }
    }

    fn report(&self) -> OccupancyReport {
        let camera = self.counter.camera();
        let state = self.counter.occupancy();
        OccupancyReport {
            camera_id: camera.id.clone(),
            calibrated: camera.calibration_line.is_some(),
            entry_direction: camera.entry_direction,
            max_capacity: camera.max_capacity,
            total_entries: state.total_entries,
            total_exits: state.total_exits,
            current_occupancy: state.current_occupancy,
            occupancy_percent: state.occupancy_percent(camera.max_capacity),
            active_tracks: self.counter.active_tracks(),
            ts: self.clock.now_ms(),
        }
    }

    fn publish_gauges(&self) {
        let camera_id = &self.counter.camera().id;
        self.metrics.set_camera_occupancy(camera_id, self.counter.occupancy().current_occupancy);
        self.metrics.set_camera_tracks(camera_id, self.counter.active_tracks() as u64);
    }
}

/// Registry of per-camera workers
///
/// Owns the declared camera set and routes batches and queries to the
/// owning worker, spawning it on first use.
pub struct CameraWorkers {
    cameras: FxHashMap<String, Camera>,
    senders: parking_lot::Mutex<FxHashMap<String, mpsc::Sender<WorkerJob>>>,
    store: Arc<dyn SnapshotStore>,
    egress: Option<EgressSender>,
    metrics: Arc<Metrics>,
    clock: Clock,
    retention_ms: u64,
    queue_capacity: usize,
    submit_deadline: Duration,
    persist_timeout: Duration,
    sweep_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl CameraWorkers {
    pub fn new(
        config: &Config,
        store: Arc<dyn SnapshotStore>,
        egress: Option<EgressSender>,
        metrics: Arc<Metrics>,
        clock: Clock,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let cameras =
            config.cameras().iter().map(|c| (c.id.clone(), c.clone())).collect::<FxHashMap<_, _>>();
        Self {
            cameras,
            senders: parking_lot::Mutex::new(FxHashMap::default()),
            store,
            egress,
            metrics,
            clock,
            retention_ms: config.retention_ms(),
            queue_capacity: config.queue_capacity(),
            submit_deadline: Duration::from_millis(config.submit_deadline_ms()),
            persist_timeout: Duration::from_millis(config.persist_timeout_ms()),
            sweep_interval: Duration::from_millis(config.sweep_interval_ms()),
            shutdown_rx,
        }
    }

    /// Get the job sender for a declared camera, spawning its worker on first use
    fn worker_for(&self, camera_id: &str) -> Result<mpsc::Sender<WorkerJob>, CountingError> {
        let camera = self
            .cameras
            .get(camera_id)
            .ok_or_else(|| CountingError::CameraNotFound(camera_id.to_string()))?;

        let mut senders = self.senders.lock();
        if let Some(tx) = senders.get(camera_id) {
            return Ok(tx.clone());
        }

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let worker = CameraWorker {
            counter: CameraCounter::new(camera.clone(), self.retention_ms, self.metrics.clone()),
            job_rx: rx,
            store: self.store.clone(),
            egress: self.egress.clone(),
            metrics: self.metrics.clone(),
            clock: self.clock.clone(),
            persist_timeout: self.persist_timeout,
            sweep_interval: self.sweep_interval,
            shutdown_rx: self.shutdown_rx.clone(),
        };
        tokio::spawn(worker.run());
        info!(camera_id = %camera_id, "camera_worker_started");

        senders.insert(camera_id.to_string(), tx.clone());
        Ok(tx)
    }

    /// Submit a batch and wait for its counting summary (HTTP path)
    ///
    /// Waits up to the submit deadline for queue space; past that the
    /// batch is rejected as overloaded.
    pub async fn submit(
        &self,
        camera_id: &str,
        batch: FrameBatch,
    ) -> Result<CountingSummary, CountingError> {
        let tx = self.worker_for(camera_id)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = WorkerJob::Frames { batch, enqueued_at: Instant::now(), reply: Some(reply_tx) };

        if tx.send_timeout(job, self.submit_deadline).await.is_err() {
            self.metrics.record_batch_rejected();
            let rejected = self.metrics.batches_rejected();
            if rejected % 100 == 1 {
                warn!(
                    camera_id = %camera_id,
                    rejected_total = %rejected,
                    "batch_submit_rejected"
                );
            }
            return Err(CountingError::Overloaded(camera_id.to_string()));
        }

        reply_rx.await.map_err(|_| CountingError::Overloaded(camera_id.to_string()))?
    }

    /// Submit a batch without waiting for the result (MQTT path)
    ///
    /// Uses try_send so a slow camera sheds its own load; drops are counted.
    pub fn submit_detached(&self, camera_id: &str, batch: FrameBatch) -> Result<(), CountingError> {
        let tx = self.worker_for(camera_id)?;
        let job = WorkerJob::Frames { batch, enqueued_at: Instant::now(), reply: None };

        if tx.try_send(job).is_err() {
            self.metrics.record_frame_dropped();
            let dropped = self.metrics.frames_dropped();
            if dropped % 100 == 1 {
                warn!(camera_id = %camera_id, dropped_total = %dropped, "frames_dropped");
            }
        }
        Ok(())
    }

    /// Fetch the current occupancy report for a camera
    ///
    /// Goes through the worker queue, so the report reflects every batch
    /// submitted before it.
    pub async fn query(&self, camera_id: &str) -> Result<OccupancyReport, CountingError> {
        let tx = self.worker_for(camera_id)?;
        let (reply_tx, reply_rx) = oneshot::channel();

        if tx.send_timeout(WorkerJob::Query { reply: reply_tx }, self.submit_deadline).await.is_err()
        {
            return Err(CountingError::Overloaded(camera_id.to_string()));
        }

        reply_rx.await.map_err(|_| CountingError::Overloaded(camera_id.to_string()))
    }

    /// Number of cameras with a running worker
    pub fn active_camera_count(&self) -> usize {
        self.senders.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{BBox, CalibrationLine, Detection};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    const PERSON_W: f64 = 40.0;
    const PERSON_H: f64 = 110.0;

    fn test_camera(id: &str) -> Camera {
        Camera {
            id: id.to_string(),
            calibration_line: Some(CalibrationLine { x1: 0.0, y1: 240.0, x2: 640.0, y2: 240.0 }),
            entry_direction: EntryDirection::UpToDown,
            max_capacity: Some(10),
        }
    }

    fn person_at(track_id: i64, foot_x: f64, foot_y: f64) -> Detection {
        Detection {
            class: "person".to_string(),
            track_id: Some(track_id),
            confidence: Some(0.9),
            bbox: Some(BBox {
                x: Some(foot_x - PERSON_W / 2.0),
                y: Some(foot_y - PERSON_H),
                width: Some(PERSON_W),
                height: Some(PERSON_H),
            }),
        }
    }

    fn batch(detections: Vec<Detection>) -> FrameBatch {
        FrameBatch { ts: None, detections }
    }

    /// In-memory store for worker tests
    #[derive(Default)]
    struct MemoryStore {
        snapshots: Mutex<FxHashMap<String, OccupancySnapshot>>,
    }

    #[async_trait]
    impl SnapshotStore for MemoryStore {
        async fn load_latest(&self, camera_id: &str) -> anyhow::Result<Option<OccupancySnapshot>> {
            Ok(self.snapshots.lock().get(camera_id).cloned())
        }

        async fn upsert(&self, snapshot: &OccupancySnapshot) -> anyhow::Result<()> {
            self.snapshots.lock().insert(snapshot.camera_id.clone(), snapshot.clone());
            Ok(())
        }
    }

    /// Store whose writes always fail
    struct FailingStore;

    #[async_trait]
    impl SnapshotStore for FailingStore {
        async fn load_latest(&self, _camera_id: &str) -> anyhow::Result<Option<OccupancySnapshot>> {
            Ok(None)
        }

        async fn upsert(&self, _snapshot: &OccupancySnapshot) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }

    /// Store whose writes never complete
    struct StuckStore;

    #[async_trait]
    impl SnapshotStore for StuckStore {
        async fn load_latest(&self, _camera_id: &str) -> anyhow::Result<Option<OccupancySnapshot>> {
            Ok(None)
        }

        async fn upsert(&self, _snapshot: &OccupancySnapshot) -> anyhow::Result<()> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    fn workers_with_store(
        cameras: Vec<Camera>,
        store: Arc<dyn SnapshotStore>,
    ) -> (CameraWorkers, watch::Sender<bool>) {
        let config = Config::default().with_cameras(cameras).with_queue_capacity(8);
        let metrics = Arc::new(Metrics::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = CameraWorkers::new(
            &config,
            store,
            None,
            metrics,
            Clock::manual(1_000),
            shutdown_rx,
        );
        (workers, shutdown_tx)
    }

    fn workers(cameras: Vec<Camera>) -> (CameraWorkers, watch::Sender<bool>) {
        workers_with_store(cameras, Arc::new(MemoryStore::default()))
    }

    #[tokio::test]
    async fn test_unknown_camera_rejected() {
        let (workers, _shutdown) = workers(vec![test_camera("cam-entrance")]);

        let result = workers.submit("cam-unknown", batch(vec![person_at(1, 320.0, 230.0)])).await;
        assert!(matches!(result, Err(CountingError::CameraNotFound(_))));

        let result = workers.query("cam-unknown").await;
        assert!(matches!(result, Err(CountingError::CameraNotFound(_))));
    }

    #[tokio::test]
    async fn test_submit_counts_entry() {
        let (workers, _shutdown) = workers(vec![test_camera("cam-entrance")]);

        let first = workers
            .submit("cam-entrance", batch(vec![person_at(1, 320.0, 230.0)]))
            .await
            .unwrap();
        assert_eq!(first.new_entries, 0);

        let second = workers
            .submit("cam-entrance", batch(vec![person_at(1, 320.0, 252.0)]))
            .await
            .unwrap();
        assert_eq!(second.new_entries, 1);
        assert_eq!(second.current_occupancy, 1);
        assert_eq!(second.crossings.len(), 1);
    }

    #[tokio::test]
    async fn test_uncalibrated_camera_rejected() {
        let mut camera = test_camera("cam-entrance");
        camera.calibration_line = None;
        let (workers, _shutdown) = workers(vec![camera]);

        let result = workers.submit("cam-entrance", batch(vec![person_at(1, 320.0, 230.0)])).await;
        assert!(matches!(result, Err(CountingError::NotCalibrated(_))));
    }

    #[tokio::test]
    async fn test_query_reflects_submitted_batches() {
        let (workers, _shutdown) = workers(vec![test_camera("cam-entrance")]);

        workers.submit("cam-entrance", batch(vec![person_at(1, 320.0, 230.0)])).await.unwrap();
        workers.submit("cam-entrance", batch(vec![person_at(1, 320.0, 252.0)])).await.unwrap();

        let report = workers.query("cam-entrance").await.unwrap();
        assert_eq!(report.camera_id, "cam-entrance");
        assert!(report.calibrated);
        assert_eq!(report.total_entries, 1);
        assert_eq!(report.total_exits, 0);
        assert_eq!(report.current_occupancy, 1);
        assert_eq!(report.occupancy_percent, Some(10));
        // Crossed track was forgotten
        assert_eq!(report.active_tracks, 0);
    }

    #[tokio::test]
    async fn test_occupancy_restored_on_spawn() {
        let store = Arc::new(MemoryStore::default());
        {
            let mut state = crate::domain::occupancy::OccupancyState::default();
            state.total_entries = 7;
            state.total_exits = 3;
            state.current_occupancy = 4;
            store
                .upsert(&OccupancySnapshot::of("cam-entrance", &state, 900))
                .await
                .unwrap();
        }

        let (workers, _shutdown) =
            workers_with_store(vec![test_camera("cam-entrance")], store);

        let report = workers.query("cam-entrance").await.unwrap();
        assert_eq!(report.total_entries, 7);
        assert_eq!(report.total_exits, 3);
        assert_eq!(report.current_occupancy, 4);
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_counts() {
        let (workers, _shutdown) =
            workers_with_store(vec![test_camera("cam-entrance")], Arc::new(FailingStore));

        workers.submit("cam-entrance", batch(vec![person_at(1, 320.0, 230.0)])).await.unwrap();
        let result = workers.submit("cam-entrance", batch(vec![person_at(1, 320.0, 252.0)])).await;
        assert!(matches!(result, Err(CountingError::Persistence(_))));

        // The crossing was still applied in memory
        let report = workers.query("cam-entrance").await.unwrap();
        assert_eq!(report.total_entries, 1);
        assert_eq!(report.current_occupancy, 1);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_http_and_drops_mqtt() {
        let config = Config::default()
            .with_cameras(vec![test_camera("cam-entrance")])
            .with_queue_capacity(1)
            .with_submit_deadline_ms(20);
        let metrics = Arc::new(Metrics::new());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = CameraWorkers::new(
            &config,
            Arc::new(StuckStore),
            None,
            metrics.clone(),
            Clock::manual(1_000),
            shutdown_rx,
        );

        // First batch positions the track, second produces a crossing whose
        // persist never completes, wedging the worker
        workers.submit_detached("cam-entrance", batch(vec![person_at(1, 320.0, 230.0)])).unwrap();
        workers.submit_detached("cam-entrance", batch(vec![person_at(1, 320.0, 252.0)])).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Fill the queue, then both paths must shed load
        workers.submit_detached("cam-entrance", batch(vec![])).unwrap();

        let result = workers.submit("cam-entrance", batch(vec![])).await;
        assert!(matches!(result, Err(CountingError::Overloaded(_))));
        assert_eq!(metrics.batches_rejected(), 1);

        workers.submit_detached("cam-entrance", batch(vec![])).unwrap();
        assert_eq!(metrics.frames_dropped(), 1);
    }
}
