//! Error types for printer sessions.

use thiserror::Error;

/// Errors from printer session operations.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Transport or authentication failure on any channel.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Malformed frame or unexpected message shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Frame extraction or transport deadline exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// File transfer failed.
    #[error("upload failed: {0}")]
    Upload(String),

    /// Caller supplied a value the protocol cannot carry.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeviceError {
    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }
}

/// Result type for printer session operations.
pub type Result<T> = std::result::Result<T, DeviceError>;
