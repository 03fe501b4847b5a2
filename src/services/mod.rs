//! Services - counting logic and worker management
//!
//! This module contains the core business logic services:
//! - `counter` - Per-camera counting state machine (batches in, crossings out)
//! - `counter_worker` - Async per-camera workers and the job channel in front of them
//! - `trajectory` - Per-track position history with time-based retention
//! - `geometry` - Segment intersection and direction classification

pub mod counter;
pub mod counter_worker;
pub mod geometry;
pub mod trajectory;

// Re-export commonly used types
pub use counter::CameraCounter;
pub use counter_worker::{CameraWorkers, OccupancyReport};
