//! BLE link via btleplug
//!
//! Lamps expose service `fff0` with a write-without-response characteristic
//! `fff3` for frames and a notify characteristic `fff4`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::bleuuid::uuid_from_u16;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::LinkError;
use crate::protocol::{gatt, is_lamp_name};
use crate::types::{LinkEvent, LinkHandle, ScanResult};
use crate::LinkAdapter;

/// How long `connect` keeps scanning for an address it has not seen yet
const DISCOVERY_WINDOW: Duration = Duration::from_secs(5);
const DISCOVERY_POLL: Duration = Duration::from_millis(200);

struct BleSession {
    id: u64,
    peripheral: Peripheral,
    write_char: Characteristic,
}

/// BLE adapter backed by the first system Bluetooth adapter
pub struct BleLink {
    adapter: Adapter,
    sessions: Mutex<HashMap<String, BleSession>>,
    next_id: AtomicU64,
    events: broadcast::Sender<LinkEvent>,
}

impl BleLink {
    /// Open the first Bluetooth adapter and start the event pump
    pub async fn new() -> Result<Self, LinkError> {
        let manager = Manager::new()
            .await
            .map_err(|e| LinkError::AdapterUnavailable(e.to_string()))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| LinkError::AdapterUnavailable(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| LinkError::AdapterUnavailable("no Bluetooth adapter found".into()))?;

        let (events, _) = broadcast::channel(64);
        spawn_event_pump(adapter.clone(), events.clone()).await?;

        Ok(Self {
            adapter,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            events,
        })
    }

    async fn find_peripheral(&self, address: &str) -> Result<Option<Peripheral>, LinkError> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| LinkError::ScanFailed(e.to_string()))?;
        Ok(peripherals
            .into_iter()
            .find(|p| p.address().to_string().eq_ignore_ascii_case(address)))
    }

    async fn discover(&self, address: &str) -> Result<Peripheral, LinkError> {
        if let Some(p) = self.find_peripheral(address).await? {
            return Ok(p);
        }

        debug!("{} not seen yet, scanning", address);
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| LinkError::ScanFailed(e.to_string()))?;

        let deadline = tokio::time::Instant::now() + DISCOVERY_WINDOW;
        let found = loop {
            if let Some(p) = self.find_peripheral(address).await? {
                break Some(p);
            }
            if tokio::time::Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(DISCOVERY_POLL).await;
        };

        if let Err(e) = self.adapter.stop_scan().await {
            debug!("stop_scan: {}", e);
        }

        found.ok_or_else(|| LinkError::ConnectFailed {
            address: address.to_string(),
            reason: "lamp not in range".into(),
        })
    }
}

async fn spawn_event_pump(
    adapter: Adapter,
    tx: broadcast::Sender<LinkEvent>,
) -> Result<(), LinkError> {
    let mut stream = adapter
        .events()
        .await
        .map_err(|e| LinkError::AdapterUnavailable(e.to_string()))?;

    tokio::spawn(async move {
        while let Some(event) = stream.next().await {
            if let CentralEvent::DeviceDisconnected(id) = event {
                match adapter.peripheral(&id).await {
                    Ok(p) => {
                        let address = p.address().to_string();
                        debug!("{} disconnected", address);
                        let _ = tx.send(LinkEvent::Disconnected { address });
                    }
                    Err(e) => debug!("Disconnect from unknown peripheral {:?}: {}", id, e),
                }
            }
        }
        debug!("BLE event pump stopped");
    });
    Ok(())
}

async fn forward_notifications(
    peripheral: Peripheral,
    address: String,
    tx: broadcast::Sender<LinkEvent>,
) {
    let notify_uuid = uuid_from_u16(gatt::NOTIFY_SHORT);
    let Some(notify_char) = peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == notify_uuid)
    else {
        return;
    };
    if let Err(e) = peripheral.subscribe(&notify_char).await {
        debug!("{}: notifications unavailable: {}", address, e);
        return;
    }
    let mut stream = match peripheral.notifications().await {
        Ok(stream) => stream,
        Err(e) => {
            debug!("{}: notification stream failed: {}", address, e);
            return;
        }
    };
    tokio::spawn(async move {
        while let Some(n) = stream.next().await {
            let _ = tx.send(LinkEvent::Notification {
                address: address.clone(),
                data: n.value,
            });
        }
    });
}

#[async_trait]
impl LinkAdapter for BleLink {
    async fn scan(&self, timeout: Duration) -> Result<Vec<ScanResult>, LinkError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| LinkError::ScanFailed(e.to_string()))?;
        tokio::time::sleep(timeout).await;
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("stop_scan: {}", e);
        }

        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| LinkError::ScanFailed(e.to_string()))?;

        let mut results = Vec::new();
        for p in peripherals {
            let props = match p.properties().await {
                Ok(Some(props)) => props,
                Ok(None) => continue,
                Err(e) => {
                    debug!("properties for {}: {}", p.address(), e);
                    continue;
                }
            };
            let name = props.local_name.unwrap_or_default();
            if !is_lamp_name(&name) {
                continue;
            }
            results.push(ScanResult {
                address: p.address().to_string(),
                name,
                rssi: props.rssi.unwrap_or(0),
            });
        }
        results.sort_by(|a, b| b.rssi.cmp(&a.rssi));
        Ok(results)
    }

    async fn connect(&self, address: &str) -> Result<LinkHandle, LinkError> {
        let peripheral = self.discover(address).await?;
        let failed = |reason: String| LinkError::ConnectFailed {
            address: address.to_string(),
            reason,
        };

        peripheral.connect().await.map_err(|e| failed(e.to_string()))?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let write_uuid = uuid_from_u16(gatt::WRITE_SHORT);
        let Some(write_char) = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == write_uuid)
        else {
            if let Err(e) = peripheral.disconnect().await {
                debug!("{}: disconnect after failed discovery: {}", address, e);
            }
            return Err(failed(format!(
                "write characteristic {} not found",
                gatt::WRITE_CHARACTERISTIC_UUID
            )));
        };

        forward_notifications(peripheral.clone(), address.to_string(), self.events.clone()).await;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().insert(
            address.to_string(),
            BleSession {
                id,
                peripheral,
                write_char,
            },
        );
        info!("BLE link to {} established", address);
        Ok(LinkHandle {
            address: address.to_string(),
            id,
        })
    }

    async fn write(&self, handle: &LinkHandle, data: &[u8]) -> Result<(), LinkError> {
        let (peripheral, write_char) = {
            let sessions = self.sessions.lock();
            match sessions.get(&handle.address) {
                Some(s) if s.id == handle.id => (s.peripheral.clone(), s.write_char.clone()),
                _ => return Err(LinkError::NotConnected(handle.address.clone())),
            }
        };
        peripheral
            .write(&write_char, data, WriteType::WithoutResponse)
            .await
            .map_err(|e| LinkError::WriteFailed(e.to_string()))
    }

    async fn disconnect(&self, handle: &LinkHandle) -> Result<(), LinkError> {
        let session = {
            let mut sessions = self.sessions.lock();
            match sessions.get(&handle.address) {
                Some(s) if s.id == handle.id => sessions.remove(&handle.address),
                _ => None,
            }
        };
        let Some(session) = session else {
            return Ok(());
        };
        session.peripheral.disconnect().await.map_err(|e| {
            warn!("BLE disconnect from {} failed: {}", handle.address, e);
            LinkError::DisconnectFailed(e.to_string())
        })
    }

    fn subscribe_events(&self) -> Option<broadcast::Receiver<LinkEvent>> {
        Some(self.events.subscribe())
    }
}
