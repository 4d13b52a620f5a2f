//! Detection messages published by the external position detector
//!
//! Each message is a JSON object:
//!
//! ```json
//! {"detect": true, "pos": [0.12, -0.40, 0.95]}
//! ```
//!
//! `pos` is only looked at when `detect` is true. Other fields are ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ExtposError, ExtposResult};
use crate::types::PositionSample;

/// A detection message as it appears on the wire
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectionMessage {
    /// Whether the detector found the object in this frame
    pub detect: bool,
    /// Position of the object, required when `detect` is true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<Value>,
}

/// Outcome of decoding a detection message
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Detection {
    Found(PositionSample),
    NotFound,
}

impl DetectionMessage {
    /// Message reporting a detection at the given position
    pub fn found(sample: PositionSample) -> Self {
        Self {
            detect: true,
            pos: Some(serde_json::json!([sample.x, sample.y, sample.z])),
        }
    }

    /// Message reporting that nothing was detected
    pub fn not_found() -> Self {
        Self {
            detect: false,
            pos: None,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// Interpret the message. `pos` is validated only when `detect` is set.
    pub fn detection(&self) -> ExtposResult<Detection> {
        if !self.detect {
            return Ok(Detection::NotFound);
        }

        let pos = self
            .pos
            .as_ref()
            .ok_or_else(|| ExtposError::MalformedMessage("missing pos".to_string()))?;

        let coords = pos
            .as_array()
            .ok_or_else(|| ExtposError::MalformedMessage("pos is not an array".to_string()))?;

        if coords.len() != 3 {
            return Err(ExtposError::MalformedMessage(format!(
                "pos has {} elements, expected 3",
                coords.len()
            )));
        }

        let mut xyz = [0f64; 3];
        for (slot, value) in xyz.iter_mut().zip(coords) {
            *slot = value.as_f64().ok_or_else(|| {
                ExtposError::MalformedMessage(format!("pos element {} is not a number", value))
            })?;
        }

        Ok(Detection::Found(PositionSample::new(xyz[0], xyz[1], xyz[2])))
    }
}

/// Decode a raw message body straight to a detection
pub fn parse_detection(data: &[u8]) -> ExtposResult<Detection> {
    DetectionMessage::from_bytes(data)?.detection()
}
