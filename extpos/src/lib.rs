//! Extpos - External Position Relay
//!
//! Extpos pulls object detections from an external position detector and
//! forwards them to the flight controller as external position commands
//! while the flight-control link is up.

pub mod config;
pub mod link;
pub mod relay;
pub mod tab;

pub use config::*;
pub use link::*;
pub use relay::*;
pub use tab::*;
