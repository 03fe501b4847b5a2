//! Counting gateway - entry/exit counting from camera detections
//!
//! Consumes per-camera frame batches over MQTT or HTTP, detects calibration
//! line crossings, and maintains per-camera occupancy.
//!
//! Module structure:
//! - `domain/` - Core business types (Camera, FrameBatch, CrossingEvent, Occupancy)
//! - `io/` - External interfaces (MQTT, HTTP, Egress, Snapshots)
//! - `services/` - Counting logic (CameraCounter, CameraWorkers)
//! - `infra/` - Infrastructure (Config, Metrics, Clock, Broker)

use clap::Parser;
use counting_gateway::infra::{Clock, Config, Metrics};
use counting_gateway::io::{create_egress_channel, JsonlSnapshotStore, MqttPublisher};
use counting_gateway::services::CameraWorkers;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Counting gateway - camera-based entry/exit counting
#[derive(Parser, Debug)]
#[command(name = "counting-gateway", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), git = env!("GIT_HASH"), "counting-gateway starting");

    // Parse command line arguments using clap
    let args = Args::parse();

    // Load configuration from TOML file (needed for broker config)
    let config = Config::from_file(&args.config)?;

    // Start embedded MQTT broker with config
    counting_gateway::infra::broker::start_embedded_broker(&config);

    // Log configuration
    info!(
        config_file = %config.config_file(),
        site_id = %config.site_id(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        frames_topic = %config.frames_topic(),
        http_port = %config.http_port(),
        cameras = %config.cameras().len(),
        retention_ms = %config.retention_ms(),
        snapshot_file = %config.snapshot_file(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create shared components
    let metrics = Arc::new(Metrics::new());
    let camera_ids: Vec<String> = config.cameras().iter().map(|c| c.id.clone()).collect();
    metrics.set_cameras(&camera_ids);

    let store = Arc::new(JsonlSnapshotStore::new(config.snapshot_file()));

    // Create MQTT egress channel and publisher (if enabled)
    let egress_sender = if config.mqtt_egress_enabled() {
        let (egress_sender, egress_rx) =
            create_egress_channel(1000, config.site_id().to_string(), metrics.clone());

        // Start MQTT egress publisher
        let publisher = MqttPublisher::new(&config, egress_rx);
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });

        Some(egress_sender)
    } else {
        None
    };

    // Create per-camera workers (spawned lazily on first batch per camera)
    let workers = Arc::new(CameraWorkers::new(
        &config,
        store,
        egress_sender.clone(),
        metrics.clone(),
        Clock::system(),
        shutdown_rx.clone(),
    ));

    // Start MQTT frame ingest
    let mqtt_config = config.clone();
    let mqtt_workers = workers.clone();
    let mqtt_metrics = metrics.clone();
    let mqtt_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = counting_gateway::io::mqtt::start_mqtt_ingest(
            &mqtt_config,
            mqtt_workers,
            mqtt_metrics,
            mqtt_shutdown,
        )
        .await
        {
            tracing::error!(error = %e, "MQTT ingest error");
        }
    });

    // Start HTTP API (frame submission, occupancy queries, metrics)
    let http_bind = config.http_bind_address().to_string();
    let http_port = config.http_port();
    let http_workers = workers.clone();
    let http_metrics = metrics.clone();
    let http_site = config.site_id().to_string();
    let http_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = counting_gateway::io::http::start_http_server(
            &http_bind,
            http_port,
            http_workers,
            http_metrics,
            http_site,
            http_shutdown,
        )
        .await
        {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    // Start metrics reporter (lock-free reads with full summary)
    let metrics_clone = metrics.clone();
    let reporter_workers = workers.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            let summary = metrics_clone.report(reporter_workers.active_camera_count());
            summary.log();
        }
    });

    // Start metrics egress publisher (separate from logging)
    if let Some(metrics_egress) = egress_sender.clone() {
        let metrics_for_egress = metrics.clone();
        let egress_workers = workers.clone();
        let egress_interval = config.mqtt_egress_metrics_interval_secs();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(egress_interval));
            loop {
                interval.tick().await;
                let summary = metrics_for_egress.report(egress_workers.active_camera_count());
                metrics_egress.send_metrics(summary);
            }
        });
    }

    info!("counting-gateway started");

    // Wait for Ctrl+C, then broadcast shutdown
    tokio::signal::ctrl_c().await.ok();
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    // Brief drain window so the egress publisher can flush queued messages
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    info!("counting-gateway shutdown complete");
    Ok(())
}
