//! Connection manager with retry, reconnect and backoff
//!
//! Wraps a raw [`LinkAdapter`] and adds the policies the adapters leave out:
//! a cache of live links, connect/write timeouts, per-address serialization
//! and the reconnect-on-failure write loop.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::LinkError;
use crate::frame::Frame;
use crate::protocol::timing;
use crate::types::{ConnectionStatus, LinkEvent, LinkHandle, ScanResult};
use crate::BoxedLink;

/// Timeouts and retry budget applied to every link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total write attempts, including the first one
    pub attempts: u32,
    /// Pause after a failed attempt (not after the last one)
    pub backoff: Duration,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: timing::WRITE_ATTEMPTS,
            backoff: Duration::from_millis(timing::RETRY_BACKOFF_MS),
            connect_timeout: Duration::from_millis(timing::CONNECT_TIMEOUT_MS),
            write_timeout: Duration::from_millis(timing::WRITE_TIMEOUT_MS),
        }
    }
}

enum LinkSlot {
    Connecting,
    Connected(LinkHandle),
}

/// Per-address serialization.
///
/// `connect` guards the connect/disconnect transitions, `write` keeps a whole
/// retry cycle for one frame from interleaving with another frame's cycle.
#[derive(Default)]
struct AddressLocks {
    connect: tokio::sync::Mutex<()>,
    write: tokio::sync::Mutex<()>,
}

/// Owns every live link and delivers frames reliably
pub struct ConnectionManager {
    link: BoxedLink,
    policy: RetryPolicy,
    slots: RwLock<HashMap<String, LinkSlot>>,
    locks: Mutex<HashMap<String, Arc<AddressLocks>>>,
}

impl ConnectionManager {
    pub fn new(link: BoxedLink, policy: RetryPolicy) -> Self {
        Self {
            link,
            policy,
            slots: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Discover nearby lamps
    pub async fn scan(&self, timeout: Duration) -> Result<Vec<ScanResult>, LinkError> {
        debug!("Scanning for {:?}", timeout);
        let results = self.link.scan(timeout).await?;
        info!("Scan found {} lamp(s)", results.len());
        Ok(results)
    }

    /// Connect to `address`, reusing a live link if there is one.
    ///
    /// Concurrent callers for the same address share a single adapter connect.
    pub async fn connect(&self, address: &str) -> Result<LinkHandle, LinkError> {
        if let Some(handle) = self.cached(address) {
            return Ok(handle);
        }

        let locks = self.locks_for(address);
        let _guard = locks.connect.lock().await;

        // Another caller may have finished while we waited
        if let Some(handle) = self.cached(address) {
            return Ok(handle);
        }

        self.slots
            .write()
            .insert(address.to_string(), LinkSlot::Connecting);
        debug!("Connecting to {}", address);

        let result =
            match tokio::time::timeout(self.policy.connect_timeout, self.link.connect(address))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(LinkError::Timeout {
                    operation: "connect",
                    after: self.policy.connect_timeout,
                }),
            };

        let mut slots = self.slots.write();
        match result {
            Ok(handle) => {
                info!("Connected to {}", address);
                slots.insert(address.to_string(), LinkSlot::Connected(handle.clone()));
                Ok(handle)
            }
            Err(e) => {
                slots.remove(address);
                Err(e)
            }
        }
    }

    /// Disconnect `address`. Not being connected is not an error.
    ///
    /// The cached link is dropped even when the adapter reports a failure.
    pub async fn disconnect(&self, address: &str) -> Result<(), LinkError> {
        let locks = self.locks_for(address);
        let _guard = locks.connect.lock().await;

        let slot = self.slots.write().remove(address);
        match slot {
            Some(LinkSlot::Connected(handle)) => {
                debug!("Disconnecting {}", address);
                self.link.disconnect(&handle).await
            }
            _ => Ok(()),
        }
    }

    /// Disconnect every live link, logging individual failures
    pub async fn disconnect_all(&self) {
        let addresses = self.connected_addresses();
        let results = join_all(addresses.iter().map(|a| self.disconnect(a))).await;
        for (address, result) in addresses.iter().zip(results) {
            if let Err(e) = result {
                warn!("Failed to disconnect {}: {}", address, e);
            }
        }
    }

    /// Deliver one frame, reconnecting and retrying on failure.
    ///
    /// Each failed attempt tears the link down so the next one starts from a
    /// fresh connection. Succeeds as soon as any attempt does.
    pub async fn write_command(&self, address: &str, frame: &Frame) -> Result<(), LinkError> {
        let locks = self.locks_for(address);
        let _guard = locks.write.lock().await;

        let attempts = self.policy.attempts.max(1);
        let mut last = None;

        for attempt in 1..=attempts {
            match self.try_write(address, frame).await {
                Ok(()) => {
                    if attempt > 1 {
                        debug!("Write to {} succeeded on attempt {}", address, attempt);
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Write to {} failed (attempt {}/{}): {}",
                        address, attempt, attempts, e
                    );
                    if let Err(de) = self.disconnect(address).await {
                        debug!("Disconnect after failed write to {}: {}", address, de);
                    }
                    last = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.backoff).await;
                    }
                }
            }
        }

        Err(LinkError::RetriesExhausted {
            address: address.to_string(),
            attempts,
            last: Box::new(last.unwrap_or_else(|| LinkError::NotConnected(address.to_string()))),
        })
    }

    async fn try_write(&self, address: &str, frame: &Frame) -> Result<(), LinkError> {
        let handle = self.connect(address).await?;
        tokio::time::timeout(
            self.policy.write_timeout,
            self.link.write(&handle, frame.as_bytes()),
        )
        .await
        .map_err(|_| LinkError::Timeout {
            operation: "write",
            after: self.policy.write_timeout,
        })?
    }

    pub fn status(&self, address: &str) -> ConnectionStatus {
        match self.slots.read().get(address) {
            Some(LinkSlot::Connected(_)) => ConnectionStatus::Connected,
            Some(LinkSlot::Connecting) => ConnectionStatus::Connecting,
            None => ConnectionStatus::Disconnected,
        }
    }

    pub fn is_connected(&self, address: &str) -> bool {
        self.status(address).is_connected()
    }

    pub fn connected_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self
            .slots
            .read()
            .iter()
            .filter(|(_, slot)| matches!(slot, LinkSlot::Connected(_)))
            .map(|(address, _)| address.clone())
            .collect();
        addresses.sort();
        addresses
    }

    /// Drop cached links when the adapter reports the peer went away.
    ///
    /// Returns None if the adapter has no event stream. The task ends when
    /// the manager is dropped or the adapter closes its channel.
    pub fn watch_events(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut events = self.link.subscribe_events()?;
        let manager: Weak<Self> = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(n)) => {
                        warn!("Link event watcher lagged, skipped {} event(s)", n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                match event {
                    LinkEvent::Disconnected { address } => {
                        let mut slots = manager.slots.write();
                        if matches!(slots.get(&address), Some(LinkSlot::Connected(_))) {
                            slots.remove(&address);
                            info!("{} dropped the link", address);
                        }
                    }
                    LinkEvent::Notification { address, data } => {
                        debug!("Notification from {}: {:02X?}", address, data);
                    }
                }
            }
            debug!("Link event watcher stopped");
        }))
    }

    fn cached(&self, address: &str) -> Option<LinkHandle> {
        match self.slots.read().get(address) {
            Some(LinkSlot::Connected(handle)) => Some(handle.clone()),
            _ => None,
        }
    }

    fn locks_for(&self, address: &str) -> Arc<AddressLocks> {
        self.locks
            .lock()
            .entry(address.to_string())
            .or_default()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimLink;
    use crate::frame::encode_power;

    const LAMP: &str = "BE:EF:00:00:00:01";

    fn manager(sim: &Arc<SimLink>) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(sim.clone(), RetryPolicy::default()))
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let sim = Arc::new(SimLink::new().with_lamp(LAMP, "ELK-BLEDOM", -60));
        let mgr = manager(&sim);

        let a = mgr.connect(LAMP).await.unwrap();
        let b = mgr.connect(LAMP).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(sim.connect_attempts(), 1);
        assert_eq!(mgr.status(LAMP), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn test_concurrent_connects_share_one_link() {
        let sim = Arc::new(SimLink::new().with_lamp(LAMP, "ELK-BLEDOM", -60));
        sim.set_connect_delay(Duration::from_millis(20));
        let mgr = manager(&sim);

        let (a, b) = tokio::join!(mgr.connect(LAMP), mgr.connect(LAMP));
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(sim.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let sim = Arc::new(SimLink::new().with_lamp(LAMP, "ELK-BLEDOM", -60));
        sim.set_connect_delay(Duration::from_secs(60));
        let mgr = manager(&sim);

        let err = mgr.connect(LAMP).await.unwrap_err();
        assert!(matches!(err, LinkError::Timeout { operation: "connect", .. }));
        assert_eq!(mgr.status(LAMP), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_when_not_connected() {
        let sim = Arc::new(SimLink::new());
        let mgr = manager(&sim);

        mgr.disconnect("00:00:00:00:00:00").await.unwrap();
        assert_eq!(sim.disconnect_calls(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_all() {
        let sim = Arc::new(
            SimLink::new()
                .with_lamp(LAMP, "ELK-BLEDOM", -60)
                .with_lamp("BE:EF:00:00:00:02", "LEDBLE", -70),
        );
        let mgr = manager(&sim);
        mgr.connect(LAMP).await.unwrap();
        mgr.connect("BE:EF:00:00:00:02").await.unwrap();

        mgr.disconnect_all().await;
        assert!(mgr.connected_addresses().is_empty());
        assert_eq!(sim.disconnect_calls(), 2);
    }

    #[tokio::test]
    async fn test_peer_disconnect_invalidates_cache() {
        let sim = Arc::new(SimLink::new().with_lamp(LAMP, "ELK-BLEDOM", -60));
        let mgr = manager(&sim);
        let watcher = mgr.watch_events().unwrap();

        mgr.connect(LAMP).await.unwrap();
        sim.drop_connection(LAMP);

        for _ in 0..50 {
            if !mgr.is_connected(LAMP) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!mgr.is_connected(LAMP));

        mgr.write_command(LAMP, &encode_power(true)).await.unwrap();
        assert_eq!(sim.connect_attempts(), 2);
        watcher.abort();
    }
}
