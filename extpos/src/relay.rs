//! Position relay for Extpos
//!
//! A relay owns one listener thread. The thread pulls detection messages off
//! the detector channel and, while the flight-control link is connected,
//! forwards each detected position as an external position command.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use extposlib::{
    parse_detection, ConnectionState, Detection, ExtposError, ExtposResult, PositionSample,
    PullSocket, Statistics,
};
use log::{debug, info, warn};

use crate::config::constants::{ENDPOINT_DELAY_INIT, ENDPOINT_DELAY_MAX, RECV_POLL_INTERVAL};
use crate::link::ExtposSink;

/// What the forwarding step did with a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Command handed to the sink
    Sent,
    /// Link down, sample discarded
    Dropped,
    /// Sink reported an error
    Failed,
}

/// Forward a sample if the link is connected. Disconnected samples are
/// discarded, never queued.
pub fn forward(
    sample: PositionSample,
    z_offset: f64,
    state: &ConnectionState,
    sink: &dyn ExtposSink,
) -> ForwardOutcome {
    if !state.is_connected() {
        return ForwardOutcome::Dropped;
    }

    let target = sample.with_z_offset(z_offset);
    match sink.send_extpos(target.x, target.y, target.z) {
        Ok(()) => ForwardOutcome::Sent,
        Err(e) => {
            warn!("External position not sent: {}", e);
            ForwardOutcome::Failed
        }
    }
}

/// Exponential delay between attempts on a failing channel
#[derive(Debug, Clone)]
pub struct Backoff {
    init: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(init: Duration, max: Duration) -> Self {
        Self {
            init,
            max,
            current: init,
        }
    }

    /// Delay to use now; doubles the next one up to the maximum
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.init;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(ENDPOINT_DELAY_INIT, ENDPOINT_DELAY_MAX)
    }
}

/// State owned by the listener thread
pub struct Listener {
    socket: PullSocket,
    sink: Arc<dyn ExtposSink>,
    state: ConnectionState,
    z_offset: f64,
    backoff: Backoff,
    stats: Statistics,
}

impl Listener {
    pub fn new(
        socket: PullSocket,
        sink: Arc<dyn ExtposSink>,
        state: ConnectionState,
        z_offset: f64,
    ) -> Self {
        Self {
            socket,
            sink,
            state,
            z_offset,
            backoff: Backoff::default(),
            stats: Statistics::new(),
        }
    }

    pub fn statistics(&self) -> Statistics {
        self.stats
    }

    /// Handle one message body taken off the channel
    pub fn handle_message(&mut self, body: &[u8]) -> Option<ForwardOutcome> {
        self.stats.messages_received += 1;

        let sample = match parse_detection(body) {
            Ok(Detection::Found(sample)) => sample,
            Ok(Detection::NotFound) => return None,
            Err(e) => {
                self.stats.messages_malformed += 1;
                debug!("Discarding detection message: {}", e);
                return None;
            }
        };

        self.stats.detections += 1;
        let outcome = forward(sample, self.z_offset, &self.state, self.sink.as_ref());
        match outcome {
            ForwardOutcome::Sent => self.stats.samples_forwarded += 1,
            ForwardOutcome::Dropped => self.stats.samples_dropped += 1,
            ForwardOutcome::Failed => self.stats.forward_failures += 1,
        }
        Some(outcome)
    }

    /// Wait for one message and handle it. Returns the delay to observe
    /// before the next attempt after a channel error.
    pub fn poll(&mut self, wait: Duration) -> Option<Duration> {
        match self.socket.recv_timeout(wait) {
            Ok(Some(body)) => {
                self.backoff.reset();
                self.handle_message(&body);
                None
            }
            Ok(None) => {
                self.backoff.reset();
                None
            }
            Err(e) if e.is_malformed() => {
                self.stats.messages_received += 1;
                self.stats.messages_malformed += 1;
                debug!("Discarding detection message: {}", e);
                None
            }
            Err(e) => {
                self.stats.receive_errors += 1;
                let delay = self.backoff.next_delay();
                warn!(
                    "Detector channel {} failed: {}; retrying in {:?}",
                    self.socket.endpoint(),
                    e,
                    delay
                );
                Some(delay)
            }
        }
    }

    /// Receive loop. No error ends it; only clearing `running` does.
    pub fn run(mut self, running: &AtomicBool) -> Statistics {
        while running.load(Ordering::SeqCst) {
            if let Some(delay) = self.poll(RECV_POLL_INTERVAL) {
                sleep_while(running, delay);
            }
        }
        self.socket.disconnect();
        self.stats
    }
}

fn sleep_while(running: &AtomicBool, delay: Duration) {
    let deadline = Instant::now() + delay;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(RECV_POLL_INTERVAL));
    }
}

/// Relay thread state
pub struct PositionRelay {
    endpoint: String,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<Statistics>>,
}

impl PositionRelay {
    /// Start the listener thread
    pub fn start(listener: Listener) -> ExtposResult<Self> {
        let endpoint = listener.socket.endpoint().to_string();
        let running = Arc::new(AtomicBool::new(true));

        let thread_running = running.clone();
        let handle = thread::Builder::new()
            .name("extpos-listener".to_string())
            .spawn(move || listener.run(&thread_running))?;

        info!("Listening for detections on {}", endpoint);
        Ok(Self {
            endpoint,
            running,
            thread_handle: Some(handle),
        })
    }

    /// Stop the listener thread and return its counters
    pub fn stop(&mut self) -> ExtposResult<Statistics> {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let stats = handle
                .join()
                .map_err(|_| ExtposError::Channel("Thread join failed".to_string()))?;
            info!("Stopped listening on {}", self.endpoint);
            Ok(stats.with_timestamp())
        } else {
            Ok(Statistics::new())
        }
    }

    /// Check if the relay is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for PositionRelay {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}
