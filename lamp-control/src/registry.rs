//! Device registry and state store
//!
//! Owns the catalog of known lamps and their last confirmed state. Every
//! setter writes through the [`ConnectionManager`] first and only records
//! the new state once the write is confirmed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lamp_transport::{ConnectionManager, ConnectionStatus, LampCommand, ScanResult};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{ControlError, Result};
use crate::state::{DeviceState, Look, Rgb, WhiteBalance};

/// A known lamp
#[derive(Debug, Clone)]
pub struct Device {
    pub address: String,
    pub name: String,
    pub rssi: i16,
    /// Filled from the connection manager on every read
    pub connection: ConnectionStatus,
    pub state: DeviceState,
    pub last_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Device {
    fn new(address: &str, name: &str, rssi: i16) -> Self {
        let now = Utc::now();
        Self {
            address: address.to_string(),
            name: name.to_string(),
            rssi,
            connection: ConnectionStatus::Disconnected,
            state: DeviceState::default(),
            last_seen: now,
            last_updated: now,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }
}

pub struct DeviceRegistry {
    link: Arc<ConnectionManager>,
    devices: RwLock<HashMap<String, Device>>,
}

impl DeviceRegistry {
    pub fn new(link: Arc<ConnectionManager>) -> Self {
        Self {
            link,
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Discover lamps and merge them into the catalog.
    ///
    /// Returns the devices seen in this scan.
    pub async fn scan(&self, timeout: Duration) -> Result<Vec<Device>> {
        let results = self.link.scan(timeout).await?;
        let now = Utc::now();

        {
            let mut devices = self.devices.write();
            for ScanResult { address, name, rssi } in &results {
                let device = devices
                    .entry(address.clone())
                    .or_insert_with(|| Device::new(address, name, *rssi));
                if !name.is_empty() {
                    device.name = name.clone();
                }
                device.rssi = *rssi;
                device.last_seen = now;
            }
        }

        Ok(results
            .iter()
            .filter_map(|r| self.get(&r.address).ok())
            .collect())
    }

    /// Add an address without scanning, e.g. one given on the command line
    pub fn track(&self, address: &str, name: &str) -> Device {
        self.devices
            .write()
            .entry(address.to_string())
            .or_insert_with(|| Device::new(address, name, 0));
        self.view(address).unwrap_or_else(|| Device::new(address, name, 0))
    }

    pub fn contains(&self, address: &str) -> bool {
        self.devices.read().contains_key(address)
    }

    pub fn get(&self, address: &str) -> Result<Device> {
        self.view(address)
            .ok_or_else(|| ControlError::DeviceNotFound(address.to_string()))
    }

    /// All known devices, ordered by address
    pub fn list(&self) -> Vec<Device> {
        let mut list: Vec<Device> = self
            .devices
            .read()
            .values()
            .cloned()
            .map(|mut d| {
                d.connection = self.link.status(&d.address);
                d
            })
            .collect();
        list.sort_by(|a, b| a.address.cmp(&b.address));
        list
    }

    pub async fn set_power(&self, address: &str, on: bool) -> Result<Device> {
        self.execute(address, LampCommand::Power(on)).await
    }

    pub async fn set_color(&self, address: &str, rgb: Rgb) -> Result<Device> {
        self.apply_look(address, Look::Rgb(rgb)).await
    }

    pub async fn set_brightness(&self, address: &str, level: u8) -> Result<Device> {
        self.execute(address, LampCommand::Brightness(level)).await
    }

    pub async fn set_white_balance(&self, address: &str, wb: WhiteBalance) -> Result<Device> {
        self.apply_look(address, Look::WhiteBalance(wb)).await
    }

    pub async fn set_effect(&self, address: &str, index: u8, speed: u8) -> Result<Device> {
        self.apply_look(address, Look::Effect { index, speed }).await
    }

    pub async fn apply_look(&self, address: &str, look: Look) -> Result<Device> {
        self.execute(address, look.command()).await
    }

    /// Write `command` and record it once the lamp accepted it.
    ///
    /// Unknown addresses are rejected before any link I/O. On failure the
    /// stored state keeps its last confirmed value.
    pub async fn execute(&self, address: &str, command: LampCommand) -> Result<Device> {
        if !self.contains(address) {
            return Err(ControlError::DeviceNotFound(address.to_string()));
        }

        debug!("{} <- {}", address, command);
        self.link.write_command(address, &command.encode()).await?;

        {
            let mut devices = self.devices.write();
            let device = devices
                .get_mut(address)
                .ok_or_else(|| ControlError::DeviceNotFound(address.to_string()))?;
            device.state.apply(command);
            device.last_updated = device.state.last_updated;
        }
        info!("{}: {}", address, command);
        self.get(address)
    }

    fn view(&self, address: &str) -> Option<Device> {
        let mut device = self.devices.read().get(address).cloned()?;
        device.connection = self.link.status(address);
        Some(device)
    }
}
