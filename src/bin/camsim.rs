//! Camera Frame Simulator
//!
//! Publishes synthetic person detections to the counting gateway over MQTT.
//! Walkers pace up and down the frame, crossing the calibration line on each
//! pass, so entries, exits, and track churn can be exercised without cameras.
//!
//! Walkers are deterministic (lane and speed derive from the walker index),
//! so a given flag set always produces the same crossing sequence. After a
//! full down-and-up lap a walker reappears under a fresh track id, the way a
//! detector assigns ids to new people.
//!
//! Usage:
//!   cargo run --bin camsim -- --camera cam-entrance --walkers 3 --fps 10

use clap::Parser;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde_json::json;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

// Person box size (foot point lands on the lane center)
const PERSON_WIDTH: f64 = 40.0;
const PERSON_HEIGHT: f64 = 110.0;

// How far above and below the line a walker travels before turning
const TRAVEL_PX: f64 = 120.0;

#[derive(Parser, Debug)]
#[command(name = "camsim")]
#[command(about = "Synthetic camera frame publisher for local testing")]
struct Args {
    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    mqtt_host: String,

    /// MQTT broker port
    #[arg(long, default_value = "1883")]
    mqtt_port: u16,

    /// Camera id to publish frames for
    #[arg(short, long, default_value = "cam-entrance")]
    camera: String,

    /// Number of simultaneous walkers
    #[arg(short, long, default_value = "3")]
    walkers: usize,

    /// Frames per second
    #[arg(long, default_value = "10")]
    fps: u64,

    /// Calibration line y coordinate (must match the gateway config)
    #[arg(long, default_value = "240.0")]
    line_y: f64,

    /// Frame width in pixels (walker lanes spread across it)
    #[arg(long, default_value = "640.0")]
    frame_width: f64,

    /// How long to run, in seconds (0 = until interrupted)
    #[arg(long, default_value = "0")]
    duration_secs: u64,

    /// Include a non-person detection in every frame
    #[arg(long)]
    with_cart: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Cross {
    Down,
    Up,
}

#[derive(Debug)]
struct Walker {
    track_id: i64,
    lane_x: f64,
    foot_y: f64,
    speed: f64, // px per frame, sign is direction of travel
}

impl Walker {
    /// Advance one frame; returns the line crossing if one happened
    fn step(&mut self, line_y: f64, next_track_id: &mut i64) -> Option<Cross> {
        let prev = self.foot_y;
        self.foot_y += self.speed;

        // Turn around at the travel bounds
        if self.speed > 0.0 && self.foot_y > line_y + TRAVEL_PX {
            self.speed = -self.speed;
        } else if self.speed < 0.0 && self.foot_y < line_y - TRAVEL_PX {
            self.speed = -self.speed;
            // Full lap done; reappear as a fresh track
            self.track_id = *next_track_id;
            *next_track_id += 1;
        }

        let was_above = prev < line_y;
        let is_above = self.foot_y < line_y;
        if was_above != is_above {
            Some(if is_above { Cross::Up } else { Cross::Down })
        } else {
            None
        }
    }

    /// Detection JSON for the current position
    fn detection(&self) -> serde_json::Value {
        json!({
            "class": "person",
            "track_id": self.track_id,
            "confidence": 0.92,
            "bbox": {
                "x": self.lane_x - PERSON_WIDTH / 2.0,
                "y": self.foot_y - PERSON_HEIGHT,
                "width": PERSON_WIDTH,
                "height": PERSON_HEIGHT,
            }
        })
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let broker = format!("{}:{}", args.mqtt_host, args.mqtt_port);
    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║                 Camera Frame Simulator                   ║");
    println!("╠══════════════════════════════════════════════════════════╣");
    println!("║ Camera:          {:<38}  ║", args.camera);
    println!("║ Broker:          {:<38}  ║", broker);
    println!("║ Walkers:         {:>5}                                   ║", args.walkers);
    println!("║ FPS:             {:>5}                                   ║", args.fps);
    println!("║ Line y:          {:>7.1}                                 ║", args.line_y);
    println!("║ Duration:        {:>5} s (0 = until interrupted)         ║", args.duration_secs);
    println!("╚══════════════════════════════════════════════════════════╝");
    println!();

    let started =
        time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    println!("[SIM] Started at {}", started);

    let client_id = format!("camsim-{}", std::process::id());
    let mut mqtt_options = MqttOptions::new(client_id, &args.mqtt_host, args.mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 100);

    // Drive the MQTT eventloop in the background
    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                eprintln!("[SIM] MQTT error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    // Deterministic walker setup: lanes spread across the frame, fractional
    // speeds and staggered starts keep feet off the exact line coordinate
    let mut next_track_id: i64 = args.walkers as i64 + 1;
    let mut walkers: Vec<Walker> = (0..args.walkers)
        .map(|i| Walker {
            track_id: i as i64 + 1,
            lane_x: args.frame_width * (i as f64 + 1.0) / (args.walkers as f64 + 1.0),
            foot_y: args.line_y - TRAVEL_PX + 0.3 + (i as f64 * 7.9) % 60.0,
            speed: 2.3 + 0.6 * (i % 5) as f64,
        })
        .collect();

    let topic = format!("cameras/{}/frames", args.camera);
    let frame_interval = Duration::from_millis(1000 / args.fps.max(1));
    let deadline =
        (args.duration_secs > 0).then(|| Instant::now() + Duration::from_secs(args.duration_secs));

    let mut ticker = tokio::time::interval(frame_interval);
    let mut frames_sent: u64 = 0;
    let mut crossings_down: u64 = 0;
    let mut crossings_up: u64 = 0;

    println!("[SIM] Publishing to {} ({} fps)", topic, args.fps);

    loop {
        ticker.tick().await;
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                break;
            }
        }

        let mut detections = Vec::with_capacity(walkers.len() + 1);
        for walker in walkers.iter_mut() {
            match walker.step(args.line_y, &mut next_track_id) {
                Some(Cross::Down) => {
                    crossings_down += 1;
                    println!(
                        "[SIM] track {} crossed DOWN (down={} up={})",
                        walker.track_id, crossings_down, crossings_up
                    );
                }
                Some(Cross::Up) => {
                    crossings_up += 1;
                    println!(
                        "[SIM] track {} crossed UP (down={} up={})",
                        walker.track_id, crossings_down, crossings_up
                    );
                }
                None => {}
            }
            detections.push(walker.detection());
        }

        if args.with_cart {
            detections.push(json!({
                "class": "cart",
                "track_id": 9000,
                "confidence": 0.75,
                "bbox": {"x": 10.0, "y": 10.0, "width": 60.0, "height": 50.0}
            }));
        }

        let payload = json!({
            "ts": epoch_ms(),
            "detections": detections,
        });

        if let Err(e) =
            client.publish(&topic, QoS::AtMostOnce, false, payload.to_string().into_bytes()).await
        {
            eprintln!("[SIM] Publish failed: {}", e);
        } else {
            frames_sent += 1;
        }
    }

    println!();
    println!(
        "[SIM] Done: {} frames, {} down crossings, {} up crossings",
        frames_sent, crossings_down, crossings_up
    );
    println!("[SIM] With an up_to_down camera, down crossings are entries and up are exits");
    println!(
        "[SIM] Check: curl http://localhost:8080/cameras/{}/occupancy",
        args.camera
    );

    Ok(())
}
