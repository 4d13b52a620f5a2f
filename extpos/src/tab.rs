//! External position tab
//!
//! Callbacks from the flight-control link arrive on whatever thread the link
//! uses. They are turned into `TabEvent`s and queued; the tab's event loop
//! is the only place that acts on them.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use extposlib::{ConnectionState, ExtposResult, PullSocket, Statistics};
use log::{debug, error, info};

use crate::config::constants::EVENT_POLL_INTERVAL;
use crate::config::RelayConfig;
use crate::link::{FlightLink, LogBlockData, LogBlockError, ParamUpdate};
use crate::relay::{Listener, PositionRelay};

/// Notifications delivered to the tab event loop
#[derive(Debug, Clone, PartialEq)]
pub enum TabEvent {
    Connected(String),
    Disconnected(String),
    ParamUpdated(ParamUpdate),
    LogData(LogBlockData),
    LogError(LogBlockError),
}

/// The external position tab: connection gate, relay and event queue
pub struct ExtposTab {
    state: ConnectionState,
    events: Receiver<TabEvent>,
    relay: PositionRelay,
}

impl ExtposTab {
    /// Subscribe to the link and start relaying from the detector
    pub fn new(link: &FlightLink, config: &RelayConfig) -> ExtposResult<Self> {
        let (sender, events) = unbounded();
        subscribe(link, &sender);

        info!("Connecting socket to detector at {} ...", config.detector_endpoint);
        let socket = PullSocket::connect(&config.detector_endpoint)?;

        let state = ConnectionState::new();
        let listener = Listener::new(socket, link.extpos(), state.clone(), config.z_offset);
        let relay = PositionRelay::start(listener)?;

        Ok(Self {
            state,
            events,
            relay,
        })
    }

    pub fn name(&self) -> &'static str {
        "External position"
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    fn handle_event(&mut self, event: TabEvent) {
        match event {
            TabEvent::Connected(uri) => {
                info!("Flight controller connected on {}", uri);
                self.state.set_connected(true);
            }
            TabEvent::Disconnected(uri) => {
                info!("Flight controller disconnected from {}", uri);
                self.state.set_connected(false);
            }
            TabEvent::ParamUpdated(update) => {
                debug!("Updated {} to {}", update.name, update.value);
            }
            TabEvent::LogData(block) => {
                debug!("{}:{}:{:?}", block.timestamp, block.config, block.data);
            }
            TabEvent::LogError(err) => {
                error!("Error when using log config [{}]: {}", err.config, err.message);
            }
        }
    }

    /// Handle every queued event without blocking. Returns how many ran.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Run the event loop until `running` clears
    pub fn run(&mut self, running: &AtomicBool) {
        while running.load(Ordering::SeqCst) {
            match self.events.recv_timeout(EVENT_POLL_INTERVAL) {
                Ok(event) => self.handle_event(event),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.process_pending();
    }

    /// Stop the relay and return its counters
    pub fn shutdown(mut self) -> ExtposResult<Statistics> {
        self.relay.stop()
    }
}

fn subscribe(link: &FlightLink, sender: &Sender<TabEvent>) {
    let tx = sender.clone();
    link.connected.add_callback(move |uri: &String| {
        let _ = tx.send(TabEvent::Connected(uri.clone()));
    });

    let tx = sender.clone();
    link.disconnected.add_callback(move |uri: &String| {
        let _ = tx.send(TabEvent::Disconnected(uri.clone()));
    });

    let tx = sender.clone();
    link.param_updated.add_callback(move |update: &ParamUpdate| {
        let _ = tx.send(TabEvent::ParamUpdated(update.clone()));
    });

    let tx = sender.clone();
    link.log_data.add_callback(move |block: &LogBlockData| {
        let _ = tx.send(TabEvent::LogData(block.clone()));
    });

    let tx = sender.clone();
    link.log_error.add_callback(move |err: &LogBlockError| {
        let _ = tx.send(TabEvent::LogError(err.clone()));
    });
}
