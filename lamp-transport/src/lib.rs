//! Link layer for ELK-BLEDOM style Bluetooth LED lamps
//!
//! This crate turns semantic lamp commands into 9-byte frames and delivers
//! them over a pluggable link adapter:
//!
//! - Frame codec (pure, no I/O)
//! - Connection manager (idempotent connect, retry with reconnect and backoff)
//! - Simulated link for tests and `--simulate`
//! - BLE link via btleplug (feature `bluetooth`)

pub mod connection;
pub mod error;
pub mod frame;
pub mod monitor;
pub mod protocol;
pub mod sim;
pub mod types;

#[cfg(feature = "bluetooth")]
pub mod bluetooth;

pub use connection::{ConnectionManager, RetryPolicy};
pub use error::LinkError;
pub use frame::{
    encode_brightness, encode_effect, encode_power, encode_rgb, encode_single_color,
    encode_white_balance, Frame, LampCommand,
};
pub use monitor::MonitorLink;
pub use sim::SimLink;
pub use types::{ConnectionStatus, LinkEvent, LinkHandle, ScanResult};

#[cfg(feature = "bluetooth")]
pub use bluetooth::BleLink;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// The link adapter trait - every radio backend implements this
///
/// Adapters are thin: they do not retry, cache connections or apply
/// timeouts. [`ConnectionManager`] layers those policies on top.
#[async_trait]
pub trait LinkAdapter: Send + Sync {
    /// Discover nearby lamps for at most `timeout`
    async fn scan(&self, timeout: Duration) -> Result<Vec<ScanResult>, LinkError>;

    /// Establish a link and resolve the write characteristic
    async fn connect(&self, address: &str) -> Result<LinkHandle, LinkError>;

    /// Write one frame, without response
    async fn write(&self, handle: &LinkHandle, data: &[u8]) -> Result<(), LinkError>;

    /// Tear the link down
    async fn disconnect(&self, handle: &LinkHandle) -> Result<(), LinkError>;

    /// Subscribe to disconnect and notification events
    ///
    /// Returns None if the adapter cannot report them.
    fn subscribe_events(&self) -> Option<broadcast::Receiver<LinkEvent>> {
        None
    }
}

/// Type alias for a shared adapter
pub type BoxedLink = Arc<dyn LinkAdapter>;
