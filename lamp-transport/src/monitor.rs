//! Link wrapper that logs every frame as it goes out

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::LinkError;
use crate::frame::Frame;
use crate::types::{LinkEvent, LinkHandle, ScanResult};
use crate::{BoxedLink, LinkAdapter};

/// Decorates another adapter, logging writes as hex plus the decoded command
pub struct MonitorLink {
    inner: BoxedLink,
}

impl MonitorLink {
    pub fn new(inner: BoxedLink) -> Self {
        Self { inner }
    }
}

/// Human readable form of one written payload
pub fn describe(data: &[u8]) -> String {
    match Frame::try_from(data) {
        Ok(frame) => match frame.decode() {
            Some(command) => format!("{frame} ({command})"),
            None => format!("{frame} (unknown command 0x{:02X})", frame.command_byte()),
        },
        Err(len) => format!("{data:02X?} (not a frame, {len} bytes)"),
    }
}

#[async_trait]
impl LinkAdapter for MonitorLink {
    async fn scan(&self, timeout: Duration) -> Result<Vec<ScanResult>, LinkError> {
        let results = self.inner.scan(timeout).await?;
        for r in &results {
            info!("[scan] {} {:?} rssi={}", r.address, r.name, r.rssi);
        }
        Ok(results)
    }

    async fn connect(&self, address: &str) -> Result<LinkHandle, LinkError> {
        let result = self.inner.connect(address).await;
        match &result {
            Ok(handle) => info!("[link] {} up (link {})", address, handle.id),
            Err(e) => warn!("[link] {} connect failed: {}", address, e),
        }
        result
    }

    async fn write(&self, handle: &LinkHandle, data: &[u8]) -> Result<(), LinkError> {
        info!("[tx] {} {}", handle.address, describe(data));
        let result = self.inner.write(handle, data).await;
        if let Err(e) = &result {
            warn!("[tx] {} write failed: {}", handle.address, e);
        }
        result
    }

    async fn disconnect(&self, handle: &LinkHandle) -> Result<(), LinkError> {
        info!("[link] {} down (link {})", handle.address, handle.id);
        self.inner.disconnect(handle).await
    }

    fn subscribe_events(&self) -> Option<broadcast::Receiver<LinkEvent>> {
        self.inner.subscribe_events()
    }
}
