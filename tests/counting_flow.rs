//! End-to-end counting flow: config file, workers, snapshots, and egress

use counting_gateway::domain::types::FrameBatch;
use counting_gateway::infra::{Clock, Config, Metrics};
use counting_gateway::io::egress_channel::{create_egress_channel, EgressMessage};
use counting_gateway::io::JsonlSnapshotStore;
use counting_gateway::services::CameraWorkers;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::sync::watch;

fn write_config(config_path: &Path, snapshot_path: &Path) {
    let content = format!(
        r#"
[persistence]
snapshot_file = "{}"

[[cameras]]
id = "cam-entrance"
entry_direction = "up_to_down"
max_capacity = 4

[cameras.calibration_line]
x1 = 0.0
y1 = 240.0
x2 = 640.0
y2 = 240.0
"#,
        snapshot_path.display()
    );
    std::fs::write(config_path, content).unwrap();
}

/// One person detection, wire-shaped, with the foot point at (320, foot_y)
fn batch(track_id: i64, foot_y: f64) -> FrameBatch {
    serde_json::from_value(serde_json::json!({
        "ts": 1736012345678u64,
        "detections": [{
            "class": "person",
            "track_id": track_id,
            "confidence": 0.9,
            "bbox": {"x": 300.0, "y": foot_y - 110.0, "width": 40.0, "height": 110.0}
        }]
    }))
    .unwrap()
}

#[tokio::test]
async fn test_counting_flow_end_to_end() {
    let dir = tempdir().unwrap();
    let snapshot_path = dir.path().join("occupancy.jsonl");
    let config_path = dir.path().join("gateway.toml");
    write_config(&config_path, &snapshot_path);

    let config = Config::from_file(&config_path).unwrap();
    let metrics = Arc::new(Metrics::new());
    metrics.set_cameras(&["cam-entrance".to_string()]);
    let store = Arc::new(JsonlSnapshotStore::new(snapshot_path.to_str().unwrap()));
    let (egress, mut egress_rx) =
        create_egress_channel(64, config.site_id().to_string(), metrics.clone());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let clock = Clock::manual(1_000);

    let workers = CameraWorkers::new(
        &config,
        store,
        Some(egress),
        metrics.clone(),
        clock.clone(),
        shutdown_rx,
    );

    // First observation above the line: no crossing yet
    let summary = workers.submit("cam-entrance", batch(7, 230.0)).await.unwrap();
    assert_eq!(summary.new_entries, 0);
    assert!(summary.crossings.is_empty());
    assert!(egress_rx.try_recv().is_err());

    // Same track crosses downward: one entry
    clock.advance(100);
    let summary = workers.submit("cam-entrance", batch(7, 252.0)).await.unwrap();
    assert_eq!(summary.new_entries, 1);
    assert_eq!(summary.new_exits, 0);
    assert_eq!(summary.total_entries, 1);
    assert_eq!(summary.current_occupancy, 1);
    assert_eq!(summary.crossings.len(), 1);

    let crossing = match egress_rx.recv().await.unwrap() {
        EgressMessage::Crossing(payload) => payload,
        other => panic!("expected crossing, got {:?}", other),
    };
    assert_eq!(crossing.site.as_deref(), Some("counting"));
    assert_eq!(crossing.cam, "cam-entrance");
    assert_eq!(crossing.tid, 7);
    assert_eq!(crossing.t, "entry");
    assert_eq!(crossing.dir, "down");
    assert_eq!(crossing.ts, 1_100);

    let occupancy = match egress_rx.recv().await.unwrap() {
        EgressMessage::Occupancy(payload) => payload,
        other => panic!("expected occupancy, got {:?}", other),
    };
    assert_eq!(occupancy.occupancy, 1);
    assert_eq!(occupancy.entries, 1);
    assert_eq!(occupancy.pct, Some(25));

    // A second person crosses upward: one exit, occupancy back to zero
    clock.advance(100);
    workers.submit("cam-entrance", batch(9, 252.0)).await.unwrap();
    clock.advance(100);
    let summary = workers.submit("cam-entrance", batch(9, 230.0)).await.unwrap();
    assert_eq!(summary.new_exits, 1);
    assert_eq!(summary.total_exits, 1);
    assert_eq!(summary.current_occupancy, 0);

    let crossing = match egress_rx.recv().await.unwrap() {
        EgressMessage::Crossing(payload) => payload,
        other => panic!("expected crossing, got {:?}", other),
    };
    assert_eq!(crossing.t, "exit");
    assert_eq!(crossing.dir, "up");

    let occupancy = match egress_rx.recv().await.unwrap() {
        EgressMessage::Occupancy(payload) => payload,
        other => panic!("expected occupancy, got {:?}", other),
    };
    assert_eq!(occupancy.occupancy, 0);
    assert_eq!(occupancy.exits, 1);

    // Query reflects the whole flow; crossed tracks are gone
    let report = workers.query("cam-entrance").await.unwrap();
    assert!(report.calibrated);
    assert_eq!(report.total_entries, 1);
    assert_eq!(report.total_exits, 1);
    assert_eq!(report.current_occupancy, 0);
    assert_eq!(report.occupancy_percent, Some(0));
    assert_eq!(report.active_tracks, 0);

    assert_eq!(metrics.entries_total(), 1);
    assert_eq!(metrics.exits_total(), 1);
    assert_eq!(metrics.batches_total(), 4);

    // Both counted batches were persisted as JSONL snapshots
    let content = std::fs::read_to_string(&snapshot_path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    let last: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(last["camera_id"], "cam-entrance");
    assert_eq!(last["total_entries"], 1);
    assert_eq!(last["total_exits"], 1);
    assert_eq!(last["current_occupancy"], 0);
    assert_eq!(last["ts"], 1_300);
}

#[tokio::test]
async fn test_occupancy_survives_restart() {
    let dir = tempdir().unwrap();
    let snapshot_path = dir.path().join("occupancy.jsonl");
    let config_path = dir.path().join("gateway.toml");
    write_config(&config_path, &snapshot_path);

    let config = Config::from_file(&config_path).unwrap();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let clock = Clock::manual(5_000);

    {
        let metrics = Arc::new(Metrics::new());
        let store = Arc::new(JsonlSnapshotStore::new(snapshot_path.to_str().unwrap()));
        let workers = CameraWorkers::new(
            &config,
            store,
            None,
            metrics,
            clock.clone(),
            shutdown_rx.clone(),
        );

        workers.submit("cam-entrance", batch(3, 230.0)).await.unwrap();
        clock.advance(100);
        let summary = workers.submit("cam-entrance", batch(3, 252.0)).await.unwrap();
        assert_eq!(summary.total_entries, 1);
    }

    // Fresh workers against the same snapshot file pick the totals back up
    let metrics = Arc::new(Metrics::new());
    let store = Arc::new(JsonlSnapshotStore::new(snapshot_path.to_str().unwrap()));
    let workers = CameraWorkers::new(&config, store, None, metrics, clock, shutdown_rx);

    let report = workers.query("cam-entrance").await.unwrap();
    assert_eq!(report.total_entries, 1);
    assert_eq!(report.total_exits, 0);
    assert_eq!(report.current_occupancy, 1);
    assert_eq!(report.occupancy_percent, Some(25));
}
