//! Unified error handling for VoltageEMS monitoring services
//!
//! Services keep their own domain error types and convert into [`VoltageError`]
//! at the boundary where an outer layer (API, CLI) needs a uniform shape.

use thiserror::Error;

/// Main error type for VoltageEMS monitoring services
#[derive(Debug, Error)]
pub enum VoltageError {
    // ======================================
    // Configuration & Storage
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // ======================================
    // Protocol & Communication
    // ======================================
    #[error("Protocol error: {protocol}: {message}")]
    Protocol { protocol: String, message: String },

    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    // ======================================
    // Validation & Resources
    // ======================================
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Resource busy: {0}")]
    ResourceBusy(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    // ======================================
    // Service & Runtime
    // ======================================
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using VoltageError
pub type VoltageResult<T> = Result<T, VoltageError>;

impl VoltageError {
    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::Validation(_) => 400,

            // 409 Conflict
            Self::AlreadyExists(_) => 409,

            // 502 Bad Gateway
            Self::Protocol { .. } => 502,

            // 503 Service Unavailable
            Self::ConnectionFailed { .. } | Self::ServiceUnavailable(_) | Self::ResourceBusy(_) => {
                503
            },

            // 504 Gateway Timeout
            Self::Timeout(_) => 504,

            // 500 Internal Server Error
            Self::Configuration(_) | Self::Storage(_) | Self::Internal(_) => 500,
        }
    }
}
