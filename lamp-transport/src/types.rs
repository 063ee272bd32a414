//! Common types for the link layer

use serde::Serialize;

/// A lamp seen during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    /// Link address (MAC on Linux, platform UUID elsewhere)
    pub address: String,
    /// Advertised name, empty when none was advertised
    pub name: String,
    /// Signal strength in dBm
    pub rssi: i16,
}

/// Connection status of a link address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Asynchronous events pushed by an adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The peer dropped the connection
    Disconnected { address: String },
    /// Notification received on the lamp's notify characteristic
    Notification { address: String, data: Vec<u8> },
}

/// Opaque handle to an established link
///
/// `id` changes on every reconnect so a stale handle can be told apart from
/// a fresh one for the same address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkHandle {
    pub address: String,
    pub id: u64,
}
