//! Error definitions for Extpos

use thiserror::Error;

/// Extpos error types
#[derive(Error, Debug)]
pub enum ExtposError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Malformed detection message: {0}")]
    MalformedMessage(String),

    #[error("Link error: {0}")]
    Link(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Channel error: {0}")]
    Channel(String),
}

impl ExtposError {
    /// True for errors caused by the message content rather than the channel
    pub fn is_malformed(&self) -> bool {
        matches!(self, ExtposError::MalformedMessage(_) | ExtposError::Json(_))
    }
}

/// Result type alias for Extpos operations
pub type ExtposResult<T> = Result<T, ExtposError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ExtposError::Config("test".to_string());
        assert_eq!(format!("{}", err), "Configuration error: test");
    }

    #[test]
    fn test_malformed_classification() {
        assert!(ExtposError::MalformedMessage("pos".to_string()).is_malformed());
        assert!(!ExtposError::NotConnected.is_malformed());
        assert!(!ExtposError::Protocol("bad greeting".to_string()).is_malformed());
    }
}
