//! Shared types for the counting gateway

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Newtype wrapper for track IDs to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TrackId(pub i64);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 2D point in camera pixel space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[inline]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Calibration line in camera pixel space
///
/// Two endpoints of the boundary whose crossing constitutes an entry or exit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationLine {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl CalibrationLine {
    #[inline]
    pub fn start(&self) -> Point {
        Point::new(self.x1, self.y1)
    }

    #[inline]
    pub fn end(&self) -> Point {
        Point::new(self.x2, self.y2)
    }
}

/// Which movement direction across the calibration line counts as an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryDirection {
    UpToDown,
    DownToUp,
    LeftToRight,
    RightToLeft,
}

impl Default for EntryDirection {
    fn default() -> Self {
        EntryDirection::UpToDown
    }
}

impl EntryDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryDirection::UpToDown => "up_to_down",
            EntryDirection::DownToUp => "down_to_up",
            EntryDirection::LeftToRight => "left_to_right",
            EntryDirection::RightToLeft => "right_to_left",
        }
    }
}

/// Camera record from configuration
///
/// Immutable for the duration of a frame-processing call. A camera without a
/// calibration line is known but not countable; batches for it are rejected
/// until calibration is configured.
#[derive(Debug, Clone, Deserialize)]
pub struct Camera {
    pub id: String,
    #[serde(default)]
    pub calibration_line: Option<CalibrationLine>,
    #[serde(default)]
    pub entry_direction: EntryDirection,
    #[serde(default)]
    pub max_capacity: Option<u32>,
}

/// Bounding box as received on the wire
///
/// Fields are individually optional so one malformed detection can be
/// skipped without rejecting the whole batch.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct BBox {
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
}

impl BBox {
    /// Tracked point for a person box: horizontal center, vertical base.
    ///
    /// The foot position approximates the ground-plane crossing better than
    /// the box center. Returns `None` when any field is missing.
    pub fn foot_point(&self) -> Option<Point> {
        match (self.x, self.y, self.width, self.height) {
            (Some(x), Some(y), Some(w), Some(h)) => Some(Point::new(x + w / 2.0, y + h)),
            _ => None,
        }
    }
}

/// One detection within a frame batch
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub track_id: Option<i64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub bbox: Option<BBox>,
}

impl Detection {
    #[inline]
    pub fn is_person(&self) -> bool {
        self.class == "person"
    }
}

/// Frame batch as received on the wire
///
/// `ts` is the upstream capture time (epoch ms) and is diagnostic only;
/// counting time comes from the service clock at processing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FrameBatch {
    #[serde(default)]
    pub ts: Option<u64>,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

/// Crossing classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CrossingKind {
    Entry,
    Exit,
}

impl CrossingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrossingKind::Entry => "entry",
            CrossingKind::Exit => "exit",
        }
    }
}

/// Coarse compass direction of movement, for diagnostics only
///
/// Derived from atan2 of the movement vector; has no effect on counting.
/// Pixel y grows downward, so `Down` is movement toward the bottom of the
/// frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Heading {
    Up,
    Down,
    Left,
    Right,
}

impl Heading {
    pub fn as_str(&self) -> &'static str {
        match self {
            Heading::Up => "up",
            Heading::Down => "down",
            Heading::Left => "left",
            Heading::Right => "right",
        }
    }
}

/// A confirmed calibration-line crossing
#[derive(Debug, Clone, Serialize)]
pub struct CrossingEvent {
    /// UUIDv7 (time-sortable) for downstream correlation
    pub id: String,
    pub track_id: TrackId,
    #[serde(rename = "type")]
    pub kind: CrossingKind,
    /// Position at the moment of crossing (the newer of the two points)
    pub position: Point,
    pub direction: Heading,
    pub ts: u64,
}

impl CrossingEvent {
    pub fn new(track_id: TrackId, kind: CrossingKind, position: Point, direction: Heading, ts: u64) -> Self {
        Self { id: Uuid::now_v7().to_string(), track_id, kind, position, direction, ts }
    }
}

/// Result of processing one frame batch for one camera
#[derive(Debug, Clone, Serialize)]
pub struct CountingSummary {
    pub new_entries: u32,
    pub new_exits: u32,
    pub total_entries: u64,
    pub total_exits: u64,
    pub current_occupancy: u64,
    pub crossings: Vec<CrossingEvent>,
}

/// Errors surfaced to batch submitters
#[derive(Debug)]
pub enum CountingError {
    /// Camera id is not declared in the configuration
    CameraNotFound(String),
    /// Camera has no calibration line; batch rejected, no state mutated
    NotCalibrated(String),
    /// The camera's worker queue stayed full past the submit deadline
    Overloaded(String),
    /// Snapshot upsert failed; in-memory counting state is kept
    Persistence(String),
}

impl std::fmt::Display for CountingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CountingError::CameraNotFound(id) => write!(f, "camera not found: {}", id),
            CountingError::NotCalibrated(id) => write!(f, "camera not calibrated: {}", id),
            CountingError::Overloaded(id) => write!(f, "frame queue full for camera: {}", id),
            CountingError::Persistence(msg) => write!(f, "snapshot persist failed: {}", msg),
        }
    }
}

impl std::error::Error for CountingError {}
