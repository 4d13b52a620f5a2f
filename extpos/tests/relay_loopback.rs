//! Relay driven end to end over a loopback ZMTP connection

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use extpos_lib::{ExtposSink, ExtposTab, FlightLink, RelayConfig};
use extposlib::{ExtposResult, PushSocket};

const WAIT: Duration = Duration::from_secs(5);

/// Keeps every position handed to the link
#[derive(Default)]
struct CaptureSink {
    sent: Mutex<Vec<(f64, f64, f64)>>,
}

impl ExtposSink for CaptureSink {
    fn open(&self, _uri: &str) -> ExtposResult<()> {
        Ok(())
    }

    fn send_extpos(&self, x: f64, y: f64, z: f64) -> ExtposResult<()> {
        self.sent.lock().unwrap().push((x, y, z));
        Ok(())
    }

    fn close(&self) {}
}

fn wait_for_sent(sink: &CaptureSink, count: usize) -> Vec<(f64, f64, f64)> {
    let deadline = Instant::now() + WAIT;
    loop {
        let sent = sink.sent.lock().unwrap().clone();
        if sent.len() >= count || Instant::now() > deadline {
            return sent;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn relay_forwards_detections_in_order() {
    let mut detector = PushSocket::bind("tcp://127.0.0.1:0").unwrap();
    let config = RelayConfig {
        detector_endpoint: format!("tcp://{}", detector.local_addr().unwrap()),
        ..RelayConfig::default()
    };

    let sink = Arc::new(CaptureSink::default());
    let link = FlightLink::new(sink.clone());
    let mut tab = ExtposTab::new(&link, &config).unwrap();

    link.open("udp://127.0.0.1:19850").unwrap();
    tab.process_pending();
    assert!(tab.is_connected());

    let messages: [&[u8]; 7] = [
        br#"{"detect": true, "pos": [1, 2, 3]}"#,
        b"this is not json",
        br#"{"detect": false, "pos": [9, 9, 9]}"#,
        br#"{"detect": true, "pos": [4, 5]}"#,
        br#"{"detect": true, "pos": [4, 5, 6]}"#,
        br#"{"detect": false}"#,
        br#"{"detect": true, "pos": [7, 8, 9]}"#,
    ];
    for body in messages {
        assert!(detector.send_timeout(body, WAIT).unwrap());
    }

    let sent = wait_for_sent(&sink, 3);
    assert_eq!(sent, vec![(1.0, 2.0, 4.5), (4.0, 5.0, 7.5), (7.0, 8.0, 10.5)]);

    link.close();
    tab.process_pending();
    assert!(!tab.is_connected());

    let stats = tab.shutdown().unwrap();
    assert_eq!(stats.messages_received, 7);
    assert_eq!(stats.messages_malformed, 2);
    assert_eq!(stats.detections, 3);
    assert_eq!(stats.samples_forwarded, 3);
    assert_eq!(stats.samples_dropped, 0);
}

#[test]
fn relay_reconnects_after_detector_restart() {
    let mut detector = PushSocket::bind("tcp://127.0.0.1:0").unwrap();
    let addr = detector.local_addr().unwrap();
    let config = RelayConfig {
        detector_endpoint: format!("tcp://{}", addr),
        ..RelayConfig::default()
    };

    let sink = Arc::new(CaptureSink::default());
    let link = FlightLink::new(sink.clone());
    let mut tab = ExtposTab::new(&link, &config).unwrap();
    link.open("udp://127.0.0.1:19850").unwrap();
    tab.process_pending();

    assert!(detector.send_timeout(br#"{"detect": true, "pos": [0, 0, 0]}"#, WAIT).unwrap());
    assert_eq!(wait_for_sent(&sink, 1).len(), 1);

    drop(detector);
    let mut detector = PushSocket::bind(&format!("tcp://{}", addr)).unwrap();
    assert!(detector.send_timeout(br#"{"detect": true, "pos": [1, 1, 1]}"#, Duration::from_secs(15)).unwrap());

    let sent = wait_for_sent(&sink, 2);
    assert_eq!(sent, vec![(0.0, 0.0, 1.5), (1.0, 1.0, 2.5)]);

    let stats = tab.shutdown().unwrap();
    assert!(stats.receive_errors >= 1);
}
