//! Currently selected lamp

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::error::{ControlError, Result};
use crate::registry::DeviceRegistry;

/// Resolves the address that hub commands and viewer effects act on
pub trait DeviceSelector: Send + Sync {
    fn selected(&self) -> Result<String>;
}

pub struct Selection {
    registry: Arc<DeviceRegistry>,
    current: RwLock<Option<String>>,
}

impl Selection {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self {
            registry,
            current: RwLock::new(None),
        }
    }

    /// Select a device the registry knows about
    pub fn select(&self, address: &str) -> Result<()> {
        if !self.registry.contains(address) {
            return Err(ControlError::DeviceNotFound(address.to_string()));
        }
        *self.current.write() = Some(address.to_string());
        info!("Selected {}", address);
        Ok(())
    }

    pub fn clear(&self) {
        *self.current.write() = None;
    }

    pub fn current(&self) -> Option<String> {
        self.current.read().clone()
    }
}

impl DeviceSelector for Selection {
    fn selected(&self) -> Result<String> {
        self.current().ok_or(ControlError::NoDeviceSelected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lamp_transport::{ConnectionManager, RetryPolicy, SimLink};

    #[test]
    fn test_select_requires_known_device() {
        let link = Arc::new(ConnectionManager::new(
            Arc::new(SimLink::new()),
            RetryPolicy::default(),
        ));
        let registry = Arc::new(DeviceRegistry::new(link));
        let selection = Selection::new(registry.clone());

        assert!(matches!(
            selection.selected(),
            Err(ControlError::NoDeviceSelected)
        ));
        assert!(selection.select("AA:AA:AA:AA:AA:AA").is_err());

        registry.track("AA:AA:AA:AA:AA:AA", "LED");
        selection.select("AA:AA:AA:AA:AA:AA").unwrap();
        assert_eq!(selection.selected().unwrap(), "AA:AA:AA:AA:AA:AA");
    }
}
