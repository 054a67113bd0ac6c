//! Error types for the order gateway

use thiserror::Error;
use tokio_tungstenite::tungstenite::{self, protocol::frame::coding::CloseCode};

/// Order gateway errors
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Connection closed")]
    ConnectionClosedExpectedly,

    #[error("Connection closed unexpectedly: {0}")]
    ConnectionClosedUnexpectedly(String),

    #[error("Upstream feed unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Startup failure: {0}")]
    StartupFailure(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Hub control loop is not running")]
    HubUnavailable,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl GatewayError {
    /// Classify a close code received from the peer.
    ///
    /// Normal closure, going away and "no status" are the codes a well-behaved
    /// client sends; anything else is logged as an error.
    pub fn from_close_code(code: Option<CloseCode>) -> Self {
        match code {
            None | Some(CloseCode::Normal) | Some(CloseCode::Away) | Some(CloseCode::Status) => {
                GatewayError::ConnectionClosedExpectedly
            }
            Some(other) => {
                GatewayError::ConnectionClosedUnexpectedly(format!("close code {}", u16::from(other)))
            }
        }
    }

    /// Whether this error should be reported at error level
    pub fn is_unexpected(&self) -> bool {
        !matches!(self, GatewayError::ConnectionClosedExpectedly)
    }
}

impl From<tungstenite::Error> for GatewayError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                GatewayError::ConnectionClosedExpectedly
            }
            tungstenite::Error::Io(e) => GatewayError::ConnectionClosedUnexpectedly(e.to_string()),
            tungstenite::Error::Protocol(e) => {
                GatewayError::ConnectionClosedUnexpectedly(e.to_string())
            }
            other => GatewayError::WebSocket(other.to_string()),
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_classification() {
        assert!(!GatewayError::from_close_code(None).is_unexpected());
        assert!(!GatewayError::from_close_code(Some(CloseCode::Normal)).is_unexpected());
        assert!(!GatewayError::from_close_code(Some(CloseCode::Away)).is_unexpected());
        assert!(GatewayError::from_close_code(Some(CloseCode::Protocol)).is_unexpected());
        assert!(GatewayError::from_close_code(Some(CloseCode::Error)).is_unexpected());
    }

    #[test]
    fn test_tungstenite_closed_is_expected() {
        let err: GatewayError = tungstenite::Error::ConnectionClosed.into();
        assert!(matches!(err, GatewayError::ConnectionClosedExpectedly));
    }
}
