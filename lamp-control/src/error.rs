//! Control layer error types

use lamp_transport::LinkError;
use thiserror::Error;

/// Errors from device control, the hub and the effect orchestrator
#[derive(Error, Debug)]
pub enum ControlError {
    /// Link layer error, surfaced after retries were exhausted
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("No device selected")]
    NoDeviceSelected,

    // Inbound command validation
    #[error("Invalid command format: {0}")]
    InvalidFormat(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Invalid {0} payload")]
    InvalidPayload(String),

    #[error("Hub is not running")]
    HubClosed,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ControlError {
    /// Machine readable code sent to observers in error replies
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidFormat(_) => "INVALID_FORMAT",
            Self::UnknownAction(_) => "UNKNOWN_ACTION",
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
            Self::NoDeviceSelected => "DEVICE_NOT_SELECTED",
            Self::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            Self::Link(_) | Self::HubClosed | Self::Config(_) => "COMMAND_FAILED",
        }
    }
}

pub type Result<T> = std::result::Result<T, ControlError>;
