//! Configuration loading for Extpos

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use extposlib::{parse_tcp_endpoint, ExtposError, ExtposResult};
use serde::{Deserialize, Serialize};

use crate::config::constants::{DETECTOR_ENDPOINT, LINK_URI, Z_OFFSET};

/// Relay configuration as read from JSON
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// ZeroMQ endpoint the detector pushes to
    pub detector_endpoint: String,
    /// Flight-control link URI
    pub link_uri: String,
    /// Added to z before forwarding
    pub z_offset: f64,
    /// Log commands instead of sending them
    pub dry_run: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            detector_endpoint: DETECTOR_ENDPOINT.to_string(),
            link_uri: LINK_URI.to_string(),
            z_offset: Z_OFFSET,
            dry_run: false,
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> ExtposResult<()> {
        parse_tcp_endpoint(&self.detector_endpoint)?;
        if !self.z_offset.is_finite() {
            return Err(ExtposError::Config(format!("z_offset {} is not finite", self.z_offset)));
        }
        Ok(())
    }
}

/// Load relay configuration from a JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> ExtposResult<RelayConfig> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let config: RelayConfig = serde_json::from_reader(reader)?;
    config.validate()?;
    Ok(config)
}

/// Configuration constants
pub mod constants {
    use std::time::Duration;

    /// Where the position detector publishes
    pub const DETECTOR_ENDPOINT: &str = "tcp://127.0.0.1:7777";

    /// Default flight-control link
    pub const LINK_URI: &str = "udp://127.0.0.1:19850";

    /// Vertical offset between the detector frame and the vehicle frame
    pub const Z_OFFSET: f64 = 1.5;

    /// How long the listener waits on the detector before checking for stop
    pub const RECV_POLL_INTERVAL: Duration = Duration::from_millis(250);

    /// Initial delay after a detector channel error
    pub const ENDPOINT_DELAY_INIT: Duration = Duration::from_millis(100);

    /// Maximum delay after repeated detector channel errors
    pub const ENDPOINT_DELAY_MAX: Duration = Duration::from_secs(10);

    /// How long the event loop waits for an event before checking for stop
    pub const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config() {
        let config_json = r#"{
            "detector_endpoint": "tcp://192.168.1.20:7777",
            "link_uri": "udp://192.168.1.30:19850",
            "z_offset": 0.25
        }"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(config_json.as_bytes()).unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.detector_endpoint, "tcp://192.168.1.20:7777");
        assert_eq!(config.link_uri, "udp://192.168.1.30:19850");
        assert_eq!(config.z_offset, 0.25);
        assert!(!config.dry_run);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"{}").unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.detector_endpoint, "tcp://127.0.0.1:7777");
        assert_eq!(config.z_offset, 1.5);
    }

    #[test]
    fn test_bad_endpoint_rejected() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(br#"{"detector_endpoint": "ipc:///tmp/detector"}"#)
            .unwrap();

        let err = load_config(temp_file.path()).unwrap_err();
        assert!(matches!(err, ExtposError::Config(_)));
    }
}
