//! Per-track position history with time-based eviction
//!
//! One store per camera, owned by that camera's worker. Key behaviors:
//! - Histories are created lazily on a track's first observed position
//! - Every append prunes positions older than the retention window relative
//!   to the position just added
//! - Per-track timestamps are kept strictly increasing; a non-advancing
//!   clock reading is clamped to newest + 1 ms
//! - `remove` drops a track after a confirmed crossing so one physical
//!   crossing cannot count twice
//! - `sweep` evicts tracks whose newest position aged out entirely, bounding
//!   memory for tracks that silently stop reporting

use crate::domain::types::{Point, TrackId};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// One observed position of a track
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPoint {
    pub pos: Point,
    pub ts: u64,
}

/// Short position histories for one camera's tracks
#[derive(Debug)]
pub struct TrajectoryStore {
    tracks: FxHashMap<TrackId, SmallVec<[TrackPoint; 8]>>,
    retention_ms: u64,
}

impl TrajectoryStore {
    pub fn new(retention_ms: u64) -> Self {
        Self { tracks: FxHashMap::default(), retention_ms }
    }

    /// Append a position for a track and prune the aged-out prefix.
    ///
    /// Pruning keeps positions strictly younger than the retention window
    /// relative to the appended position. Returns the pruned history, newest
    /// last.
    pub fn append(&mut self, track_id: TrackId, pos: Point, now_ms: u64) -> &[TrackPoint] {
        let history = self.tracks.entry(track_id).or_default();

        // Bursty delivery can repeat or rewind the clock reading between
        // batches; per-track timestamps must keep advancing.
        let ts = match history.last() {
            Some(last) if now_ms <= last.ts => last.ts + 1,
            _ => now_ms,
        };
        history.push(TrackPoint { pos, ts });

        let retention_ms = self.retention_ms;
        history.retain(|p| ts - p.ts < retention_ms);
        &history[..]
    }

    /// Drop a track's history after a confirmed crossing.
    pub fn remove(&mut self, track_id: TrackId) {
        self.tracks.remove(&track_id);
    }

    /// Evict every track whose newest position is strictly older than the
    /// retention window. Returns the number of evicted tracks.
    ///
    /// An exactly window-old history survives; append-time pruning is the
    /// stricter of the two bounds.
    pub fn sweep(&mut self, now_ms: u64) -> usize {
        let retention_ms = self.retention_ms;
        let before = self.tracks.len();
        self.tracks.retain(|_, history| {
            history.last().is_some_and(|last| now_ms.saturating_sub(last.ts) <= retention_ms)
        });
        before - self.tracks.len()
    }

    /// Number of tracks currently held.
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Current history for a track, newest last.
    pub fn history(&self, track_id: TrackId) -> Option<&[TrackPoint]> {
        self.tracks.get(&track_id).map(|h| &h[..])
    }
}
