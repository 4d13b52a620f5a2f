//! Type definitions shared between the relay and the simulator

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Timestamp for collected statistics
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timestamp {
    /// Seconds since UNIX epoch
    pub seconds: u64,
    /// Nanoseconds within the current second
    pub nanoseconds: u32,
}

impl Timestamp {
    /// Create a new timestamp from the current system time
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            seconds: duration.as_secs(),
            nanoseconds: duration.subsec_nanos(),
        }
    }
}

/// Position of a detected object in the detector's reference frame
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PositionSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PositionSample {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Shift the sample vertically
    pub fn with_z_offset(self, offset: f64) -> Self {
        Self {
            z: self.z + offset,
            ..self
        }
    }
}

/// Whether the flight-control link is up.
///
/// Written from the event loop and read by the listener thread. A stale read
/// costs at most one dropped or one extra forwarded sample.
#[derive(Debug, Clone, Default)]
pub struct ConnectionState(Arc<AtomicBool>);

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.0.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters kept by a position relay
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Statistics {
    /// Timestamp when statistics were collected
    pub timestamp: Option<Timestamp>,
    /// Number of messages taken off the detector channel
    pub messages_received: u64,
    /// Number of messages that could not be parsed
    pub messages_malformed: u64,
    /// Number of messages with the detect flag set
    pub detections: u64,
    /// Number of samples handed to the flight controller
    pub samples_forwarded: u64,
    /// Number of samples dropped because the link was down
    pub samples_dropped: u64,
    /// Number of failed receives on the detector channel
    pub receive_errors: u64,
    /// Number of external position commands that failed to send
    pub forward_failures: u64,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timestamp(mut self) -> Self {
        self.timestamp = Some(Timestamp::now());
        self
    }
}
