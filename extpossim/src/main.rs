//! Extpos Detector Simulator (extpossim)
//!
//! Stands in for the external position detector: binds a ZeroMQ PUSH socket
//! and publishes detections of an object flying a horizontal circle.
//!
//! Usage: `extpossim [endpoint] [rate_hz]`, defaulting to
//! `tcp://127.0.0.1:7777` at 30 Hz.

mod trajectory;

use std::env;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use extposlib::PushSocket;
use log::{debug, error, info, warn};
use trajectory::CircleTrajectory;

const DEFAULT_ENDPOINT: &str = "tcp://127.0.0.1:7777";
const DEFAULT_RATE_HZ: f64 = 30.0;
const PEER_WAIT: Duration = Duration::from_millis(500);

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let endpoint = env::args().nth(1).unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
    let rate = match env::args().nth(2).map(|r| r.parse::<f64>()) {
        None => DEFAULT_RATE_HZ,
        Some(Ok(rate)) if rate > 0.0 => rate,
        Some(_) => {
            error!("Rate must be a positive number of messages per second");
            process::exit(1);
        }
    };

    let mut socket = match PushSocket::bind(&endpoint) {
        Ok(socket) => socket,
        Err(e) => {
            error!("Error binding {}: {}", endpoint, e);
            process::exit(1);
        }
    };
    info!("Detector simulator publishing on {} at {} Hz", endpoint, rate);

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        running_clone.store(false, Ordering::SeqCst);
    }) {
        error!("Error setting Ctrl+C handler: {}", e);
        process::exit(1);
    }

    let trajectory = CircleTrajectory::default();
    let interval = Duration::from_secs_f64(1.0 / rate);
    let start = Instant::now();
    let mut rng = rand::thread_rng();
    let mut sent: u64 = 0;

    while running.load(Ordering::SeqCst) {
        let msg = trajectory.detection_at(start.elapsed(), &mut rng);
        let body = match msg.to_bytes() {
            Ok(body) => body,
            Err(e) => {
                error!("Error encoding detection: {}", e);
                break;
            }
        };

        match socket.send_timeout(&body, PEER_WAIT) {
            Ok(true) => {
                sent += 1;
                debug!("Sent {}", String::from_utf8_lossy(&body));
            }
            Ok(false) => continue,
            Err(e) => warn!("Relay went away: {}", e),
        }

        thread::sleep(interval);
    }

    info!("Detector simulator stopped after {} messages", sent);
}
