//! In-process simulated link
//!
//! Behaves like a radio with a fixed set of lamps in range. Used by
//! `--simulate` and throughout the test suites, with knobs for injecting
//! connect and write failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::LinkError;
use crate::types::{LinkEvent, LinkHandle, ScanResult};
use crate::LinkAdapter;

#[derive(Debug, Clone)]
struct SimLamp {
    name: String,
    rssi: i16,
}

/// Simulated link adapter
pub struct SimLink {
    lamps: RwLock<HashMap<String, SimLamp>>,
    /// address -> id of the live handle
    links: Mutex<HashMap<String, u64>>,
    next_id: AtomicU64,
    fail_connects: AtomicU32,
    fail_writes: AtomicU32,
    connect_delay: Mutex<Option<Duration>>,
    slow_writes: AtomicU32,
    write_delay: Mutex<Duration>,
    connect_attempts: AtomicU32,
    write_attempts: AtomicU32,
    disconnect_calls: AtomicU32,
    frames: Mutex<Vec<(String, Vec<u8>)>>,
    events: broadcast::Sender<LinkEvent>,
}

impl Default for SimLink {
    fn default() -> Self {
        Self::new()
    }
}

impl SimLink {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            lamps: RwLock::new(HashMap::new()),
            links: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            fail_connects: AtomicU32::new(0),
            fail_writes: AtomicU32::new(0),
            connect_delay: Mutex::new(None),
            slow_writes: AtomicU32::new(0),
            write_delay: Mutex::new(Duration::ZERO),
            connect_attempts: AtomicU32::new(0),
            write_attempts: AtomicU32::new(0),
            disconnect_calls: AtomicU32::new(0),
            frames: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Builder form of [`SimLink::add_lamp`]
    pub fn with_lamp(self, address: &str, name: &str, rssi: i16) -> Self {
        self.add_lamp(address, name, rssi);
        self
    }

    pub fn add_lamp(&self, address: &str, name: &str, rssi: i16) {
        self.lamps.write().insert(
            address.to_string(),
            SimLamp {
                name: name.to_string(),
                rssi,
            },
        );
    }

    /// Make the next `n` connect calls fail
    pub fn fail_next_connects(&self, n: u32) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` write calls fail
    pub fn fail_next_writes(&self, n: u32) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Delay every connect by `delay`
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = Some(delay);
    }

    /// Make the next `n` writes stall for `delay` before completing
    pub fn delay_next_writes(&self, n: u32, delay: Duration) {
        *self.write_delay.lock() = delay;
        self.slow_writes.store(n, Ordering::SeqCst);
    }

    /// Simulate the lamp dropping the link on its side
    pub fn drop_connection(&self, address: &str) {
        if self.links.lock().remove(address).is_some() {
            // No subscribers is fine
            let _ = self.events.send(LinkEvent::Disconnected {
                address: address.to_string(),
            });
        }
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn write_attempts(&self) -> u32 {
        self.write_attempts.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> u32 {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self, address: &str) -> bool {
        self.links.lock().contains_key(address)
    }

    /// Successfully written frames for one address, oldest first
    pub fn frames_for(&self, address: &str) -> Vec<Vec<u8>> {
        self.frames
            .lock()
            .iter()
            .filter(|(a, _)| a == address)
            .map(|(_, data)| data.clone())
            .collect()
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl LinkAdapter for SimLink {
    async fn scan(&self, _timeout: Duration) -> Result<Vec<ScanResult>, LinkError> {
        let mut results: Vec<ScanResult> = self
            .lamps
            .read()
            .iter()
            .map(|(address, lamp)| ScanResult {
                address: address.clone(),
                name: lamp.name.clone(),
                rssi: lamp.rssi,
            })
            .collect();
        results.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(results)
    }

    async fn connect(&self, address: &str) -> Result<LinkHandle, LinkError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if take_one(&self.fail_connects) {
            return Err(LinkError::ConnectFailed {
                address: address.to_string(),
                reason: "simulated connect failure".into(),
            });
        }
        if !self.lamps.read().contains_key(address) {
            return Err(LinkError::ConnectFailed {
                address: address.to_string(),
                reason: "no such lamp in range".into(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.links.lock().insert(address.to_string(), id);
        debug!("sim: connected {} (link {})", address, id);
        Ok(LinkHandle {
            address: address.to_string(),
            id,
        })
    }

    async fn write(&self, handle: &LinkHandle, data: &[u8]) -> Result<(), LinkError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);

        if take_one(&self.slow_writes) {
            let delay = *self.write_delay.lock();
            tokio::time::sleep(delay).await;
        }
        if self.links.lock().get(&handle.address) != Some(&handle.id) {
            return Err(LinkError::NotConnected(handle.address.clone()));
        }
        if take_one(&self.fail_writes) {
            return Err(LinkError::WriteFailed("simulated write failure".into()));
        }

        self.frames
            .lock()
            .push((handle.address.clone(), data.to_vec()));
        Ok(())
    }

    async fn disconnect(&self, handle: &LinkHandle) -> Result<(), LinkError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        let mut links = self.links.lock();
        if links.get(&handle.address) == Some(&handle.id) {
            links.remove(&handle.address);
        }
        Ok(())
    }

    fn subscribe_events(&self) -> Option<broadcast::Receiver<LinkEvent>> {
        Some(self.events.subscribe())
    }
}
