//! Per-camera frame counting
//!
//! The CameraCounter is the orchestrating processor for one camera:
//! - Validates the calibration precondition before touching any state
//! - Filters batches to person detections, skipping malformed ones
//! - Advances per-track trajectories and runs crossing detection against
//!   the calibration line
//! - Folds confirmed crossings into the occupancy state, in detection order
//!
//! Each counter is exclusively owned by its camera's worker task, so none of
//! this needs locks. Time is always passed in by the caller.


use crate::domain::occupancy::{OccupancySnapshot, OccupancyState};
use crate::domain::types::{
    BBox, Camera, CountingError, CountingSummary, CrossingEvent, CrossingKind, FrameBatch, TrackId,
};
use crate::infra::metrics::Metrics;
use crate::services::geometry;
use crate::services::trajectory::TrajectoryStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counting state and orchestration for one camera
pub struct CameraCounter {
    camera: Camera,
    trajectories: TrajectoryStore,
    occupancy: OccupancyState,
    metrics: Arc<Metrics>,
}

impl CameraCounter {
    pub fn new(camera: Camera, retention_ms: u64, metrics: Arc<Metrics>) -> Self {
        Self {
            camera,
            trajectories: TrajectoryStore::new(retention_ms),
            occupancy: OccupancyState::default(),
            metrics,
        }
    }

    /// Adopt a persisted snapshot as the starting occupancy state.
    pub fn restore(&mut self, snapshot: &OccupancySnapshot) {
        self.occupancy = snapshot.state();
    }

    /// Process one frame batch at `now_ms`.
    ///
    /// Person detections advance their track's trajectory; a track whose last
    /// two positions straddle the calibration line yields exactly one
    /// crossing and is then forgotten. Crossings are applied to the occupancy
    /// state in detection-array order. Malformed detections are skipped
    /// without failing the batch.
    pub fn process_batch(
        &mut self,
        batch: &FrameBatch,
        now_ms: u64,
    ) -> Result<CountingSummary, CountingError> {
        let Some(line) = self.camera.calibration_line else {
            return Err(CountingError::NotCalibrated(self.camera.id.clone()));
        };

        let mut crossings: Vec<CrossingEvent> = Vec::new();

        for (index, detection) in batch.detections.iter().enumerate() {
            if !detection.is_person() {
                continue;
            }

            let Some(position) = detection.bbox.as_ref().and_then(BBox::foot_point) else {
                self.metrics.record_detection_skipped();
                debug!(
                    camera_id = %self.camera.id,
                    index = index,
                    "detection_skipped_missing_bbox"
                );
                continue;
            };
            self.metrics.record_person_observed();

            // Upstream track id when supplied; the detection's array index
            // otherwise.
            let track_id = TrackId(detection.track_id.unwrap_or(index as i64));

            let history = self.trajectories.append(track_id, position, now_ms);
            let &[.., prev, curr] = history else {
                continue;
            };

            if !geometry::segments_cross(prev.pos, curr.pos, &line) {
                continue;
            }

            let kind = geometry::classify_crossing(prev.pos, curr.pos, self.camera.entry_direction);
            let direction = geometry::heading(prev.pos, curr.pos);

            // One physical crossing must not count twice.
            self.trajectories.remove(track_id);

            let event = CrossingEvent::new(track_id, kind, curr.pos, direction, curr.ts);
            info!(
                camera_id = %self.camera.id,
                track_id = %track_id,
                kind = event.kind.as_str(),
                direction = direction.as_str(),
                x = curr.pos.x,
                y = curr.pos.y,
                "crossing_detected"
            );
            crossings.push(event);
        }

        self.trajectories.sweep(now_ms);

        let mut new_entries = 0u32;
        let mut new_exits = 0u32;
        for crossing in &crossings {
            self.occupancy.apply(crossing.kind);
            match crossing.kind {
                CrossingKind::Entry => new_entries += 1,
                CrossingKind::Exit => new_exits += 1,
            }
        }

        if new_entries > 0 || new_exits > 0 {
            self.metrics.record_crossings(new_entries as u64, new_exits as u64);
            if let Some(capacity) = self.camera.max_capacity {
                if new_entries > 0 && self.occupancy.current_occupancy > capacity as u64 {
                    warn!(
                        camera_id = %self.camera.id,
                        occupancy = self.occupancy.current_occupancy,
                        max_capacity = capacity,
                        "capacity_exceeded"
                    );
                }
            }
        }

        Ok(CountingSummary {
            new_entries,
            new_exits,
            total_entries: self.occupancy.total_entries,
            total_exits: self.occupancy.total_exits,
            current_occupancy: self.occupancy.current_occupancy,
            crossings,
        })
    }

    /// Evict trajectories whose newest position aged out. Returns the number
    /// of evicted tracks.
    pub fn sweep(&mut self, now_ms: u64) -> usize {
        self.trajectories.sweep(now_ms)
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn occupancy(&self) -> &OccupancyState {
        &self.occupancy
    }

    /// Number of tracks with live trajectories.
    pub fn active_tracks(&self) -> usize {
        self.trajectories.len()
    }
}
