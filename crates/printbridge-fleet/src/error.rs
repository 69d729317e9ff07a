//! Error types for the fleet reconciler.

use printbridge_device::DeviceError;
use thiserror::Error;

/// Errors from fleet operations.
#[derive(Error, Debug)]
pub enum FleetError {
    /// The control plane answered with an unexpected status.
    #[error("control plane error: {0}")]
    ControlPlane(String),

    /// The control plane could not be reached or sent an unreadable body.
    #[error("control plane request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Printer session error.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl FleetError {
    /// Create a control plane error.
    pub fn control_plane(msg: impl Into<String>) -> Self {
        Self::ControlPlane(msg.into())
    }

    /// Whether this error came from the control plane round trip.
    pub fn is_control_plane(&self) -> bool {
        matches!(self, Self::ControlPlane(_) | Self::Http(_))
    }
}

/// Result type for fleet operations.
pub type Result<T> = std::result::Result<T, FleetError>;
