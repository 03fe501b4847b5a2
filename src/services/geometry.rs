//! Line-crossing geometry
//!
//! Pure functions over camera pixel space. Decides whether a two-point track
//! segment crossed the calibration line, which way the movement classifies
//! for counting, and the coarse compass heading reported in payloads.

use crate::domain::types::{CalibrationLine, CrossingKind, EntryDirection, Heading, Point};

/// Signed area of the calibration line against `p`.
///
/// Sign tells which side of the (directed) line the point lies on; zero means
/// exactly on the line.
#[inline]
fn side_of(line: &CalibrationLine, p: Point) -> f64 {
    (line.x2 - line.x1) * (p.y - line.y1) - (line.y2 - line.y1) * (p.x - line.x1)
}

/// True when `prev` and `curr` lie strictly on opposite sides of `line`.
///
/// A zero determinant (point exactly on the line) counts as neither side, so
/// boundary-grazing motion resolves on a later observation instead of firing
/// twice.
pub fn segments_cross(prev: Point, curr: Point, line: &CalibrationLine) -> bool {
    let d1 = side_of(line, prev);
    let d2 = side_of(line, curr);
    (d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0)
}

/// Classify a confirmed crossing as entry or exit.
///
/// The camera's entry direction names the movement that counts as an entry;
/// everything else on a confirmed crossing, ties included, is an exit.
pub fn classify_crossing(prev: Point, curr: Point, entry_direction: EntryDirection) -> CrossingKind {
    let dx = curr.x - prev.x;
    let dy = curr.y - prev.y;
    let entered = match entry_direction {
        EntryDirection::UpToDown => dy > 0.0,
        EntryDirection::DownToUp => dy < 0.0,
        EntryDirection::LeftToRight => dx > 0.0,
        EntryDirection::RightToLeft => dx < 0.0,
    };
    if entered {
        CrossingKind::Entry
    } else {
        CrossingKind::Exit
    }
}

/// Compass heading of the movement vector, bucketed into four quadrants
/// centered on the axes. Pixel y grows downward.
pub fn heading(prev: Point, curr: Point) -> Heading {
    let angle = (curr.y - prev.y).atan2(curr.x - prev.x).to_degrees();
    if (-45.0..45.0).contains(&angle) {
        Heading::Right
    } else if (45.0..135.0).contains(&angle) {
        Heading::Down
    } else if (-135.0..-45.0).contains(&angle) {
        Heading::Up
    } else {
        Heading::Left
    }
}
