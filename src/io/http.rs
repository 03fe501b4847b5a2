//! HTTP API and Prometheus metrics endpoint
//!
//! Serves the counting API and gateway metrics on one hyper server:
//! - POST /cameras/{id}/frames submits a detection batch and returns the
//!   counting summary
//! - GET /cameras/{id}/occupancy reports current totals for a camera
//! - GET /metrics exposes Prometheus text format
//! - GET /healthz for liveness probes

use crate::domain::types::{CountingError, FrameBatch};
use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use crate::services::counter_worker::CameraWorkers;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a gauge metric with f64 value
fn write_gauge_f64(output: &mut String, name: &str, help: &str, site: &str, val: f64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} gauge");
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val:.6}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, active_cameras: usize, site_id: &str) -> String {
    let summary = metrics.report(active_cameras);
    let mut output = String::with_capacity(8192);

    write_core_metrics(&mut output, site_id, &summary);
    write_latency_metrics(&mut output, site_id, &summary);
    write_counting_metrics(&mut output, site_id, &summary);
    write_camera_gauges(&mut output, site_id, metrics);
    write_drop_metrics(&mut output, site_id, &summary);
    write_persistence_metrics(&mut output, site_id, &summary);
    write_queue_metrics(&mut output, site_id, &summary);

    output
}

fn write_core_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "counting_batches_total",
        "Total frame batches processed",
        MetricType::Counter,
        site,
        summary.batches_total,
    );
    write_gauge_f64(
        output,
        "counting_batches_per_sec",
        "Frame batches processed per second",
        site,
        summary.batches_per_sec,
    );
    write_metric(
        output,
        "counting_active_cameras",
        "Cameras with a running worker",
        MetricType::Gauge,
        site,
        summary.active_cameras as u64,
    );
    write_metric(
        output,
        "counting_active_tracks_total",
        "Active tracks across all cameras",
        MetricType::Gauge,
        site,
        summary.active_tracks_total,
    );
}

fn write_latency_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_histogram(
        output,
        "counting_batch_latency_us",
        "Batch processing latency in microseconds",
        site,
        &summary.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.avg_process_latency_us,
    );

    write_metric(
        output,
        "counting_batch_latency_p50_us",
        "50th percentile batch latency",
        MetricType::Gauge,
        site,
        summary.lat_p50_us,
    );
    write_metric(
        output,
        "counting_batch_latency_p95_us",
        "95th percentile batch latency",
        MetricType::Gauge,
        site,
        summary.lat_p95_us,
    );
    write_metric(
        output,
        "counting_batch_latency_p99_us",
        "99th percentile batch latency",
        MetricType::Gauge,
        site,
        summary.lat_p99_us,
    );
}

fn write_counting_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "counting_entries_total",
        "Confirmed entry crossings",
        MetricType::Counter,
        site,
        summary.entries_total,
    );
    write_metric(
        output,
        "counting_exits_total",
        "Confirmed exit crossings",
        MetricType::Counter,
        site,
        summary.exits_total,
    );
    write_metric(
        output,
        "counting_detections_total",
        "Detections seen in processed batches",
        MetricType::Counter,
        site,
        summary.detections_total,
    );
    write_metric(
        output,
        "counting_persons_total",
        "Person detections with a usable position",
        MetricType::Counter,
        site,
        summary.persons_total,
    );
    write_metric(
        output,
        "counting_detections_skipped_total",
        "Detections skipped for missing bbox fields",
        MetricType::Counter,
        site,
        summary.detections_skipped_total,
    );
}

fn write_camera_gauges(output: &mut String, site: &str, metrics: &Metrics) {
    let gauges = metrics.camera_gauges();

    let _ = writeln!(output, "# HELP counting_occupancy Current occupancy per camera");
    let _ = writeln!(output, "# TYPE counting_occupancy gauge");
    for (camera_id, occupancy, _) in &gauges {
        let _ = writeln!(
            output,
            "counting_occupancy{{site=\"{site}\",camera=\"{camera_id}\"}} {occupancy}"
        );
    }

    let _ = writeln!(output, "# HELP counting_active_tracks Active tracks per camera");
    let _ = writeln!(output, "# TYPE counting_active_tracks gauge");
    for (camera_id, _, tracks) in &gauges {
        let _ = writeln!(
            output,
            "counting_active_tracks{{site=\"{site}\",camera=\"{camera_id}\"}} {tracks}"
        );
    }
}

fn write_drop_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "counting_frames_received_total",
        "MQTT frame messages received (before try_send)",
        MetricType::Counter,
        site,
        summary.frames_received,
    );
    write_metric(
        output,
        "counting_frames_dropped_total",
        "MQTT frame messages dropped due to worker queue full",
        MetricType::Counter,
        site,
        summary.frames_dropped,
    );
    write_gauge_f64(
        output,
        "counting_frame_drop_ratio",
        "Frame drop ratio (dropped / received)",
        site,
        summary.frame_drop_ratio,
    );

    write_metric(
        output,
        "counting_batches_rejected_total",
        "HTTP batch submissions rejected at the submit deadline",
        MetricType::Counter,
        site,
        summary.batches_rejected,
    );

    write_metric(
        output,
        "counting_egress_received_total",
        "Egress messages attempted (before try_send)",
        MetricType::Counter,
        site,
        summary.egress_received,
    );
    write_metric(
        output,
        "counting_egress_dropped_total",
        "Egress messages dropped due to channel full",
        MetricType::Counter,
        site,
        summary.egress_dropped,
    );
    write_gauge_f64(
        output,
        "counting_egress_drop_ratio",
        "Egress drop ratio (dropped / received)",
        site,
        summary.egress_drop_ratio,
    );
}

fn write_persistence_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "counting_snapshots_written_total",
        "Occupancy snapshots written",
        MetricType::Counter,
        site,
        summary.snapshots_written,
    );
    write_metric(
        output,
        "counting_persist_failures_total",
        "Occupancy snapshot failures or timeouts",
        MetricType::Counter,
        site,
        summary.persist_failures,
    );
}

fn write_queue_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_histogram(
        output,
        "counting_queue_delay_us",
        "Frame job queue delay in microseconds",
        site,
        &summary.queue_delay_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.queue_delay_avg_us,
    );
    write_metric(
        output,
        "counting_queue_delay_p99_us",
        "99th percentile frame job queue delay",
        MetricType::Gauge,
        site,
        summary.queue_delay_p99_us,
    );
    write_metric(
        output,
        "counting_queue_delay_max_us",
        "Maximum frame job queue delay",
        MetricType::Gauge,
        site,
        summary.queue_delay_max_us,
    );
}

/// Map a counting error to its HTTP status and response message
fn error_status_and_message(error: &CountingError) -> (StatusCode, String) {
    match error {
        CountingError::CameraNotFound(id) => {
            (StatusCode::NOT_FOUND, format!("Camera not found: {}", id))
        }
        CountingError::NotCalibrated(_) => (
            StatusCode::BAD_REQUEST,
            "Camera not calibrated. Please set calibration line first.".to_string(),
        ),
        CountingError::Overloaded(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "Counting worker overloaded".to_string())
        }
        CountingError::Persistence(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to persist occupancy".to_string())
        }
    }
}

fn error_response(error: &CountingError) -> Response<Full<Bytes>> {
    let (status, message) = error_status_and_message(error);
    json_response(status, &serde_json::json!({ "error": message }))
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(body)))
            .expect("static response should not fail"),
        Err(e) => {
            error!(error = %e, "response_serialize_failed");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "serialization failed")
        }
    }
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

/// Handle POST /cameras/{id}/frames
async fn handle_submit(
    req: Request<hyper::body::Incoming>,
    workers: Arc<CameraWorkers>,
    camera_id: &str,
) -> Response<Full<Bytes>> {
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!(error = %e, "frame_batch_body_read_failed");
            return json_response(
                StatusCode::BAD_REQUEST,
                &serde_json::json!({ "error": "failed to read request body" }),
            );
        }
    };

    let batch: FrameBatch = match serde_json::from_slice(&body) {
        Ok(batch) => batch,
        Err(e) => {
            debug!(camera_id = %camera_id, error = %e, "frame_batch_parse_failed");
            return json_response(
                StatusCode::BAD_REQUEST,
                &serde_json::json!({ "error": "invalid frame batch JSON" }),
            );
        }
    };

    match workers.submit(camera_id, batch).await {
        Ok(summary) => json_response(StatusCode::OK, &summary),
        Err(e) => error_response(&e),
    }
}

/// Handle GET /cameras/{id}/occupancy
async fn handle_occupancy(workers: Arc<CameraWorkers>, camera_id: &str) -> Response<Full<Bytes>> {
    match workers.query(camera_id).await {
        Ok(report) => json_response(StatusCode::OK, &report),
        Err(e) => error_response(&e),
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    workers: Arc<CameraWorkers>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();

    let response = match (method, segments.as_slice()) {
        (Method::POST, ["cameras", camera_id, "frames"]) => {
            handle_submit(req, workers, camera_id).await
        }
        (Method::GET, ["cameras", camera_id, "occupancy"]) => {
            handle_occupancy(workers, camera_id).await
        }
        (Method::GET, ["metrics"]) => {
            let body =
                format_prometheus_metrics(&metrics, workers.active_camera_count(), &site_id);
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail")
        }
        (Method::GET, ["healthz"]) => text_response(StatusCode::OK, "ok"),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

/// Start the HTTP API server
pub async fn start_http_server(
    bind_address: &str,
    port: u16,
    workers: Arc<CameraWorkers>,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr = format!("{}:{}", bind_address, port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let workers = workers.clone();
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let workers = workers.clone();
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, workers, metrics, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
