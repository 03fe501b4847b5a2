//! Occupancy state for a monitored zone
//!
//! Folds confirmed crossings into cumulative entry/exit totals and a clamped
//! current-occupancy value. One instance per camera, owned by that camera's
//! worker; the latest state is what gets persisted and re-read across
//! restarts.

use crate::domain::types::CrossingKind;
use serde::{Deserialize, Serialize};

/// Running occupancy totals for one camera
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OccupancyState {
    pub total_entries: u64,
    pub total_exits: u64,
    pub current_occupancy: u64,
}

impl OccupancyState {
    /// Apply one confirmed crossing.
    ///
    /// Occupancy is clamped at zero: spurious exits from detector noise must
    /// not drive the displayed value negative.
    ///
    /// # Example
    ///
    /// ```
    /// use counting_gateway::domain::occupancy::OccupancyState;
    /// use counting_gateway::domain::types::CrossingKind;
    ///
    /// let mut state = OccupancyState::default();
    /// state.apply(CrossingKind::Exit);
    /// assert_eq!(state.current_occupancy, 0);
    /// state.apply(CrossingKind::Entry);
    /// state.apply(CrossingKind::Entry);
    /// assert_eq!(state.current_occupancy, 1);
    /// ```
    pub fn apply(&mut self, kind: CrossingKind) {
        match kind {
            CrossingKind::Entry => self.total_entries += 1,
            CrossingKind::Exit => self.total_exits += 1,
        }
        self.current_occupancy = self.total_entries.saturating_sub(self.total_exits);
    }

    /// Percentage of configured capacity in use, rounded to whole percent.
    ///
    /// `None` when the camera has no (or zero) max capacity.
    pub fn occupancy_percent(&self, max_capacity: Option<u32>) -> Option<u32> {
        let capacity = max_capacity.filter(|c| *c > 0)?;
        Some(((self.current_occupancy as f64 / capacity as f64) * 100.0).round() as u32)
    }
}

/// Durable occupancy snapshot, keyed (camera_id, ts)
///
/// One JSONL line per upsert; for a repeated key the last write wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OccupancySnapshot {
    pub camera_id: String,
    pub ts: u64,
    pub total_entries: u64,
    pub total_exits: u64,
    pub current_occupancy: u64,
}

impl OccupancySnapshot {
    pub fn of(camera_id: &str, state: &OccupancyState, ts: u64) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            ts,
            total_entries: state.total_entries,
            total_exits: state.total_exits,
            current_occupancy: state.current_occupancy,
        }
    }

    /// Restore in-memory state, re-deriving the clamped occupancy so the
    /// invariant holds even for an edited snapshot file.
    pub fn state(&self) -> OccupancyState {
        OccupancyState {
            total_entries: self.total_entries,
            total_exits: self.total_exits,
            current_occupancy: self.total_entries.saturating_sub(self.total_exits),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_and_exits_accumulate() {
        let mut state = OccupancyState::default();
        state.apply(CrossingKind::Entry);
        state.apply(CrossingKind::Entry);
        state.apply(CrossingKind::Exit);

        assert_eq!(state.total_entries, 2);
        assert_eq!(state.total_exits, 1);
        assert_eq!(state.current_occupancy, 1);
    }

    #[test]
    fn test_occupancy_clamped_at_zero() {
        let mut state = OccupancyState::default();
        state.apply(CrossingKind::Exit);
        state.apply(CrossingKind::Exit);
        assert_eq!(state.total_exits, 2);
        assert_eq!(state.current_occupancy, 0);

        // Entries climb back through the exit surplus before occupancy moves
        state.apply(CrossingKind::Entry);
        assert_eq!(state.current_occupancy, 0);
        state.apply(CrossingKind::Entry);
        state.apply(CrossingKind::Entry);
        assert_eq!(state.current_occupancy, 1);
    }

    #[test]
    fn test_occupancy_percent() {
        let state = OccupancyState { total_entries: 2, total_exits: 1, current_occupancy: 1 };
        assert_eq!(state.occupancy_percent(Some(3)), Some(33));
        assert_eq!(state.occupancy_percent(Some(2)), Some(50));
        assert_eq!(state.occupancy_percent(None), None);
        assert_eq!(state.occupancy_percent(Some(0)), None);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut state = OccupancyState::default();
        state.apply(CrossingKind::Entry);
        state.apply(CrossingKind::Entry);
        state.apply(CrossingKind::Exit);

        let snapshot = OccupancySnapshot::of("cam-entrance", &state, 1736012345678);
        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: OccupancySnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);
        assert_eq!(parsed.state(), state);
    }

    #[test]
    fn test_snapshot_restore_rederives_clamp() {
        let snapshot = OccupancySnapshot {
            camera_id: "cam-entrance".to_string(),
            ts: 1,
            total_entries: 1,
            total_exits: 5,
            current_occupancy: 42,
        };
        assert_eq!(snapshot.state().current_occupancy, 0);
    }
}
