//! Flight-control link
//!
//! `FlightLink` is the piece of the flight-control client the relay talks
//! to: it owns the sink that carries external position commands and the
//! callback registries for link notifications.

use std::collections::BTreeMap;
use std::net::UdpSocket;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use extposlib::{Caller, CrtpPacket, ExtposError, ExtposResult};
use log::{debug, info};

/// Destination for external position commands
pub trait ExtposSink: Send + Sync {
    /// Open the transport for the given link URI
    fn open(&self, uri: &str) -> ExtposResult<()>;

    /// Send an external position. No acknowledgment is expected.
    fn send_extpos(&self, x: f64, y: f64, z: f64) -> ExtposResult<()>;

    /// Close the transport
    fn close(&self);
}

/// Parameter change reported by the flight controller
#[derive(Debug, Clone, PartialEq)]
pub struct ParamUpdate {
    pub name: String,
    pub value: String,
}

/// One block of log variables reported by the flight controller
#[derive(Debug, Clone, PartialEq)]
pub struct LogBlockData {
    pub timestamp: u32,
    pub config: String,
    pub data: BTreeMap<String, f64>,
}

/// Error reported for a log configuration
#[derive(Debug, Clone, PartialEq)]
pub struct LogBlockError {
    pub config: String,
    pub message: String,
}

/// Flight-control link with its notification registries
pub struct FlightLink {
    sink: Arc<dyn ExtposSink>,
    uri: Mutex<Option<String>>,
    pub connected: Caller<String>,
    pub disconnected: Caller<String>,
    pub param_updated: Caller<ParamUpdate>,
    pub log_data: Caller<LogBlockData>,
    pub log_error: Caller<LogBlockError>,
}

impl FlightLink {
    pub fn new(sink: Arc<dyn ExtposSink>) -> Self {
        Self {
            sink,
            uri: Mutex::new(None),
            connected: Caller::new(),
            disconnected: Caller::new(),
            param_updated: Caller::new(),
            log_data: Caller::new(),
            log_error: Caller::new(),
        }
    }

    /// Sink used for external position commands
    pub fn extpos(&self) -> Arc<dyn ExtposSink> {
        self.sink.clone()
    }

    pub fn uri(&self) -> Option<String> {
        self.uri.lock().ok().and_then(|uri| uri.clone())
    }

    /// Open the link and notify `connected` subscribers
    pub fn open(&self, uri: &str) -> ExtposResult<()> {
        let mut current = self
            .uri
            .lock()
            .map_err(|_| ExtposError::Link("Lock poisoned".to_string()))?;
        if let Some(open) = current.as_ref() {
            return Err(ExtposError::Link(format!("link already open to {}", open)));
        }

        self.sink.open(uri)?;
        *current = Some(uri.to_string());
        drop(current);

        info!("Link to {} open", uri);
        self.connected.call(&uri.to_string());
        Ok(())
    }

    /// Close the link and notify `disconnected` subscribers. Closing a
    /// closed link does nothing.
    pub fn close(&self) {
        let uri = match self.uri.lock() {
            Ok(mut current) => current.take(),
            Err(_) => None,
        };

        if let Some(uri) = uri {
            self.sink.close();
            info!("Link to {} closed", uri);
            self.disconnected.call(&uri);
        }
    }

    pub fn notify_param_updated(&self, name: &str, value: &str) {
        self.param_updated.call(&ParamUpdate {
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    pub fn notify_log_data(&self, data: LogBlockData) {
        self.log_data.call(&data);
    }

    pub fn notify_log_error(&self, config: &str, message: &str) {
        self.log_error.call(&LogBlockError {
            config: config.to_string(),
            message: message.to_string(),
        });
    }
}

/// CRTP over UDP, for `udp://host:port` link URIs
#[derive(Default)]
pub struct UdpCrtpSink {
    socket: Mutex<Option<UdpSocket>>,
}

impl UdpCrtpSink {
    pub fn new() -> Self {
        Self::default()
    }
}

fn udp_address(uri: &str) -> ExtposResult<&str> {
    uri.strip_prefix("udp://")
        .filter(|addr| addr.contains(':'))
        .ok_or_else(|| ExtposError::Config(format!("unsupported link URI {}, expected udp://host:port", uri)))
}

impl ExtposSink for UdpCrtpSink {
    fn open(&self, uri: &str) -> ExtposResult<()> {
        let addr = udp_address(uri)?;
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(addr)?;

        let mut slot = self
            .socket
            .lock()
            .map_err(|_| ExtposError::Link("Lock poisoned".to_string()))?;
        *slot = Some(socket);
        Ok(())
    }

    fn send_extpos(&self, x: f64, y: f64, z: f64) -> ExtposResult<()> {
        let packet = CrtpPacket::external_position(x, y, z);
        let slot = self
            .socket
            .lock()
            .map_err(|_| ExtposError::Link("Lock poisoned".to_string()))?;
        let socket = slot.as_ref().ok_or(ExtposError::NotConnected)?;
        socket.send(&packet.to_bytes())?;
        Ok(())
    }

    fn close(&self) {
        if let Ok(mut slot) = self.socket.lock() {
            *slot = None;
        }
    }
}

/// Sink that only logs, for running without a vehicle
#[derive(Default)]
pub struct LoggingSink;

impl ExtposSink for LoggingSink {
    fn open(&self, uri: &str) -> ExtposResult<()> {
        info!("[DRY RUN] open {}", uri);
        Ok(())
    }

    fn send_extpos(&self, x: f64, y: f64, z: f64) -> ExtposResult<()> {
        info!("[DRY RUN] extpos ({:.3}, {:.3}, {:.3})", x, y, z);
        Ok(())
    }

    fn close(&self) {
        debug!("[DRY RUN] close");
    }
}

/// Sink that records every command
#[cfg(test)]
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(f64, f64, f64)>>,
    failing: AtomicBool,
}

#[cfg(test)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following send fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(f64, f64, f64)> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
impl ExtposSink for RecordingSink {
    fn open(&self, _uri: &str) -> ExtposResult<()> {
        Ok(())
    }

    fn send_extpos(&self, x: f64, y: f64, z: f64) -> ExtposResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ExtposError::Link("transport down".to_string()));
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| ExtposError::Link("Lock poisoned".to_string()))?;
        sent.push((x, y, z));
        Ok(())
    }

    fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use extposlib::CRTP_PORT_LOCALIZATION;
    use std::time::Duration;

    #[test]
    fn test_open_close_notifications() {
        let link = FlightLink::new(Arc::new(RecordingSink::new()));
        let events = Arc::new(Mutex::new(Vec::new()));

        let seen = events.clone();
        link.connected.add_callback(move |uri: &String| seen.lock().unwrap().push(format!("up {}", uri)));
        let seen = events.clone();
        link.disconnected.add_callback(move |uri: &String| seen.lock().unwrap().push(format!("down {}", uri)));

        link.open("udp://127.0.0.1:19850").unwrap();
        assert_eq!(link.uri().as_deref(), Some("udp://127.0.0.1:19850"));
        assert!(link.open("udp://127.0.0.1:19850").is_err());

        link.close();
        link.close();
        assert!(link.uri().is_none());

        assert_eq!(
            *events.lock().unwrap(),
            vec!["up udp://127.0.0.1:19850", "down udp://127.0.0.1:19850"]
        );
    }

    #[test]
    fn test_udp_sink_sends_crtp() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let uri = format!("udp://{}", receiver.local_addr().unwrap());

        let sink = UdpCrtpSink::new();
        assert!(matches!(sink.send_extpos(0.0, 0.0, 0.0), Err(ExtposError::NotConnected)));

        sink.open(&uri).unwrap();
        sink.send_extpos(1.0, -2.0, 4.5).unwrap();

        let mut buf = [0u8; 64];
        let n = receiver.recv(&mut buf).unwrap();
        let packet = CrtpPacket::from_bytes(&buf[..n]).unwrap();
        assert_eq!(packet.port, CRTP_PORT_LOCALIZATION);
        assert_eq!(packet, CrtpPacket::external_position(1.0, -2.0, 4.5));

        sink.close();
        assert!(sink.send_extpos(0.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_udp_sink_rejects_other_uris() {
        let sink = UdpCrtpSink::new();
        assert!(sink.open("radio://0/80/2M").is_err());
        assert!(sink.open("udp://localhost").is_err());
    }

    #[test]
    fn test_recording_sink_failure() {
        let sink = RecordingSink::new();
        sink.send_extpos(1.0, 2.0, 3.0).unwrap();
        sink.set_failing(true);
        assert!(sink.send_extpos(4.0, 5.0, 6.0).is_err());
        assert_eq!(sink.sent(), vec![(1.0, 2.0, 3.0)]);
    }
}
