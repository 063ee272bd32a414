//! Link error types

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur on the link layer
#[derive(Error, Debug)]
pub enum LinkError {
    // Adapter
    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("Scan failed: {0}")]
    ScanFailed(String),

    // Per-device
    #[error("Failed to connect to {address}: {reason}")]
    ConnectFailed { address: String, reason: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Disconnect failed: {0}")]
    DisconnectFailed(String),

    #[error("Not connected to {0}")]
    NotConnected(String),

    #[error("Giving up on {address} after {attempts} attempts: {last}")]
    RetriesExhausted {
        address: String,
        attempts: u32,
        #[source]
        last: Box<LinkError>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_message_carries_cause() {
        let err = LinkError::RetriesExhausted {
            address: "AA:BB".into(),
            attempts: 3,
            last: Box::new(LinkError::WriteFailed("gatt busy".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("gatt busy"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
