//! Error handling for the Monitoring Service
//!
//! Failure taxonomy of the polling engine:
//!
//! - `ConnectionError` / `TimeoutError`: recoverable, absorbed by the monitor
//!   loop up to its consecutive-failure threshold
//! - `ProtocolError`: the device answered with an exception; per-register
//! - `ValidationError` / `ConfigError`: rejected before any network activity
//! - `FatalError`: the monitor loop gave up and needs an explicit restart

use errors::VoltageError;
use thiserror::Error;

/// Monitoring Service Error Type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MonSrvError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invalid arguments (register definitions, write values, addresses)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Connection establishment and maintenance errors (includes not connected)
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Device exception responses and malformed replies
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Request did not complete within the configured timeout
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// The device connection is held by another operation
    #[error("Resource busy: {0}")]
    ResourceBusy(String),

    /// Time-series storage errors
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Consecutive-failure threshold reached; monitoring halted
    #[error("Monitoring halted: {0}")]
    FatalError(String),

    /// Operation not valid in the current monitor state
    #[error("State error: {0}")]
    StateError(String),

    /// Internal errors (task failures, unexpected conditions)
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for Monitoring Service
pub type Result<T> = std::result::Result<T, MonSrvError>;

impl MonSrvError {
    /// Whether this failure means the session should be considered lost
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Self::ConnectionError(_))
    }

    /// Whether this failure was rejected before touching the network
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::ValidationError(_) | Self::ConfigError(_))
    }
}

impl From<figment::Error> for MonSrvError {
    fn from(err: figment::Error) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl From<serde_json::Error> for MonSrvError {
    fn from(err: serde_json::Error) -> Self {
        Self::StorageError(format!("Serialization: {}", err))
    }
}

impl From<tokio::task::JoinError> for MonSrvError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::InternalError(format!("Task failed: {}", err))
    }
}

impl From<MonSrvError> for VoltageError {
    fn from(err: MonSrvError) -> Self {
        match err {
            MonSrvError::ConfigError(msg) => VoltageError::Configuration(msg),
            MonSrvError::ValidationError(msg) => VoltageError::Validation(msg),
            MonSrvError::ConnectionError(msg) => VoltageError::ConnectionFailed {
                endpoint: "modbus".to_string(),
                reason: msg,
            },
            MonSrvError::ProtocolError(msg) => VoltageError::Protocol {
                protocol: "modbus".to_string(),
                message: msg,
            },
            MonSrvError::TimeoutError(msg) => VoltageError::Timeout(msg),
            MonSrvError::ResourceBusy(msg) => VoltageError::ResourceBusy(msg),
            MonSrvError::StorageError(msg) => VoltageError::Storage(msg),
            MonSrvError::FatalError(msg) => VoltageError::ServiceUnavailable(msg),
            MonSrvError::StateError(msg) => VoltageError::AlreadyExists(msg),
            MonSrvError::InternalError(msg) => VoltageError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let unavailable: VoltageError = MonSrvError::FatalError("5 failures".into()).into();
        assert_eq!(unavailable.status_code(), 503);

        let refused: VoltageError = MonSrvError::ConnectionError("refused".into()).into();
        assert_eq!(refused.status_code(), 503);

        let bad_request: VoltageError = MonSrvError::ValidationError("value".into()).into();
        assert_eq!(bad_request.status_code(), 400);

        let exception: VoltageError = MonSrvError::ProtocolError("0x02".into()).into();
        assert_eq!(exception.status_code(), 502);
    }

    #[test]
    fn test_classification() {
        assert!(MonSrvError::ConnectionError("reset".into()).is_connection_loss());
        assert!(!MonSrvError::ProtocolError("0x02".into()).is_connection_loss());
        assert!(MonSrvError::ValidationError("x".into()).is_validation());
        assert!(!MonSrvError::TimeoutError("x".into()).is_validation());
    }
}
