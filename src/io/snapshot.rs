//! Occupancy snapshot persistence
//!
//! Snapshots are written in JSONL format (one JSON object per line)
//! to the file specified in config. The file is an append-only journal:
//! the newest line for a camera is its current occupancy, so restores
//! read the whole file and keep the last match.

use crate::domain::occupancy::OccupancySnapshot;
use anyhow::Context;
use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Storage backend for per-camera occupancy snapshots
///
/// Semantics are read-one / upsert-one with last-write-wins per camera.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the most recent snapshot for a camera, if any
    async fn load_latest(&self, camera_id: &str) -> anyhow::Result<Option<OccupancySnapshot>>;

    /// Persist a snapshot, replacing any older one for the same camera
    async fn upsert(&self, snapshot: &OccupancySnapshot) -> anyhow::Result<()>;
}

/// JSONL-file snapshot store
pub struct JsonlSnapshotStore {
    file_path: String,
}

impl JsonlSnapshotStore {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "snapshot_store_initialized");
        Self { file_path: file_path.to_string() }
    }
}

#[async_trait]
impl SnapshotStore for JsonlSnapshotStore {
    async fn load_latest(&self, camera_id: &str) -> anyhow::Result<Option<OccupancySnapshot>> {
        let content = match tokio::fs::read_to_string(&self.file_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read snapshot file {}", self.file_path))
            }
        };

        let mut latest = None;
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<OccupancySnapshot>(line) {
                Ok(snapshot) => {
                    if snapshot.camera_id == camera_id {
                        latest = Some(snapshot);
                    }
                }
                Err(e) => {
                    warn!(file = %self.file_path, error = %e, "snapshot_line_invalid");
                }
            }
        }
        Ok(latest)
    }

    async fn upsert(&self, snapshot: &OccupancySnapshot) -> anyhow::Result<()> {
        // One write per line; camera workers share this file
        let mut line = serde_json::to_string(snapshot).context("Failed to serialize snapshot")?;
        line.push('\n');
        let path = Path::new(&self.file_path);

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open snapshot file {}", path.display()))?;

        file.write_all(line.as_bytes()).await?;

        debug!(
            file = %self.file_path,
            camera_id = %snapshot.camera_id,
            occupancy = %snapshot.current_occupancy,
            "snapshot_written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::occupancy::OccupancyState;
    use std::fs;
    use tempfile::tempdir;

    fn snapshot(camera_id: &str, entries: u64, exits: u64, ts: u64) -> OccupancySnapshot {
        let mut state = OccupancyState::default();
        state.total_entries = entries;
        state.total_exits = exits;
        state.current_occupancy = entries.saturating_sub(exits);
        OccupancySnapshot::of(camera_id, &state, ts)
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("occupancy.jsonl");
        let store = JsonlSnapshotStore::new(path.to_str().unwrap());

        let loaded = store.load_latest("cam-entrance").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("occupancy.jsonl");
        let store = JsonlSnapshotStore::new(path.to_str().unwrap());

        store.upsert(&snapshot("cam-entrance", 3, 1, 1000)).await.unwrap();
        store.upsert(&snapshot("cam-entrance", 5, 2, 2000)).await.unwrap();

        let loaded = store.load_latest("cam-entrance").await.unwrap().expect("snapshot");
        assert_eq!(loaded.total_entries, 5);
        assert_eq!(loaded.total_exits, 2);
        assert_eq!(loaded.current_occupancy, 3);
        assert_eq!(loaded.ts, 2000);

        // Both lines remain in the journal
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_cameras_are_isolated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("occupancy.jsonl");
        let store = JsonlSnapshotStore::new(path.to_str().unwrap());

        store.upsert(&snapshot("cam-entrance", 10, 4, 1000)).await.unwrap();
        store.upsert(&snapshot("cam-back-door", 2, 0, 1100)).await.unwrap();
        store.upsert(&snapshot("cam-entrance", 11, 4, 1200)).await.unwrap();

        let entrance = store.load_latest("cam-entrance").await.unwrap().expect("snapshot");
        assert_eq!(entrance.total_entries, 11);

        let back = store.load_latest("cam-back-door").await.unwrap().expect("snapshot");
        assert_eq!(back.total_entries, 2);

        assert!(store.load_latest("cam-unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("occupancy.jsonl");

        fs::write(&path, "not json at all\n").unwrap();

        let store = JsonlSnapshotStore::new(path.to_str().unwrap());
        store.upsert(&snapshot("cam-entrance", 1, 0, 1000)).await.unwrap();

        let loaded = store.load_latest("cam-entrance").await.unwrap().expect("snapshot");
        assert_eq!(loaded.total_entries, 1);
    }

    #[tokio::test]
    async fn test_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("state").join("occupancy.jsonl");
        let store = JsonlSnapshotStore::new(nested.to_str().unwrap());

        store.upsert(&snapshot("cam-entrance", 1, 0, 1000)).await.unwrap();
        assert!(nested.exists());
    }
}
