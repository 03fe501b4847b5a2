//! Domain models - core counting types
//!
//! This module contains the canonical data types used throughout the system:
//! - `Camera` / `CalibrationLine` / `EntryDirection` - camera configuration
//! - `Detection` / `FrameBatch` - wire-level frame input
//! - `CrossingEvent` / `CountingSummary` - per-batch counting output
//! - `OccupancyState` / `OccupancySnapshot` - running and persisted totals
//! - `CountingError` - the error taxonomy surfaced to batch submitters

pub mod occupancy;
pub mod types;

// Re-export commonly used types at module level
