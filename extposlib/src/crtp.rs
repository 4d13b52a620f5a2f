//! CRTP packets understood by the flight controller
//!
//! A CRTP packet is one header byte followed by at most 30 bytes of data.
//! The header carries the port in the high nibble and the channel in the
//! low two bits; bits 2..3 are link bits and are always set when sending.

use crate::error::{ExtposError, ExtposResult};

/// Largest CRTP payload
pub const CRTP_MAX_DATA: usize = 30;

/// Localization port, which carries external position reports
pub const CRTP_PORT_LOCALIZATION: u8 = 6;

/// Channel of the localization port for position reports
pub const CRTP_CHANNEL_POSITION: u8 = 0;

const LINK_BITS: u8 = 0x3 << 2;

/// A CRTP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrtpPacket {
    pub port: u8,
    pub channel: u8,
    pub data: Vec<u8>,
}

impl CrtpPacket {
    pub fn new(port: u8, channel: u8, data: Vec<u8>) -> ExtposResult<Self> {
        if port > 0x0F || channel > 0x03 {
            return Err(ExtposError::Link(format!("invalid CRTP port {} channel {}", port, channel)));
        }
        if data.len() > CRTP_MAX_DATA {
            return Err(ExtposError::Link(format!(
                "CRTP payload of {} bytes exceeds {}",
                data.len(),
                CRTP_MAX_DATA
            )));
        }
        Ok(Self { port, channel, data })
    }

    /// External position report: three little-endian f32 values
    pub fn external_position(x: f64, y: f64, z: f64) -> Self {
        let mut data = Vec::with_capacity(12);
        for value in [x, y, z] {
            data.extend_from_slice(&(value as f32).to_le_bytes());
        }
        Self {
            port: CRTP_PORT_LOCALIZATION,
            channel: CRTP_CHANNEL_POSITION,
            data,
        }
    }

    pub fn header(&self) -> u8 {
        ((self.port & 0x0F) << 4) | LINK_BITS | (self.channel & 0x03)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + self.data.len());
        buf.push(self.header());
        buf.extend_from_slice(&self.data);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> ExtposResult<Self> {
        let (header, data) = buf
            .split_first()
            .ok_or_else(|| ExtposError::Link("empty CRTP packet".to_string()))?;
        Self::new(header >> 4, header & 0x03, data.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_position_layout() {
        let packet = CrtpPacket::external_position(1.0, 2.0, 4.5);
        let bytes = packet.to_bytes();

        assert_eq!(bytes[0], 0x6C);
        assert_eq!(bytes.len(), 13);
        assert_eq!(&bytes[1..5], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[5..9], &2.0f32.to_le_bytes());
        assert_eq!(&bytes[9..13], &4.5f32.to_le_bytes());
    }

    #[test]
    fn test_from_bytes() {
        let packet = CrtpPacket::from_bytes(&[0x6C, 1, 2, 3]).unwrap();
        assert_eq!(packet.port, CRTP_PORT_LOCALIZATION);
        assert_eq!(packet.channel, CRTP_CHANNEL_POSITION);
        assert_eq!(packet.data, vec![1, 2, 3]);

        assert!(CrtpPacket::from_bytes(&[]).is_err());
        assert!(CrtpPacket::from_bytes(&[0x6C; 32]).is_err());
    }

    #[test]
    fn test_invalid_port() {
        assert!(CrtpPacket::new(16, 0, Vec::new()).is_err());
        assert!(CrtpPacket::new(6, 4, Vec::new()).is_err());
    }
}
