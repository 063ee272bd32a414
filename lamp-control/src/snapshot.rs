//! Single-slot state snapshots per device

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::state::DeviceState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub address: String,
    pub state: DeviceState,
    pub reason: String,
    pub captured_at: DateTime<Utc>,
}

/// Last-write-wins snapshot slot per address
#[derive(Default)]
pub struct SnapshotStore {
    slots: RwLock<HashMap<String, Snapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture `state`, replacing any previous snapshot for `address`
    pub fn save(&self, address: &str, state: &DeviceState, reason: &str) {
        self.slots.write().insert(
            address.to_string(),
            Snapshot {
                address: address.to_string(),
                state: state.clone(),
                reason: reason.to_string(),
                captured_at: Utc::now(),
            },
        );
    }

    pub fn latest(&self, address: &str) -> Option<Snapshot> {
        self.slots.read().get(address).cloned()
    }

    pub fn clear(&self, address: &str) {
        self.slots.write().remove(address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Rgb;
    use lamp_transport::LampCommand;

    #[test]
    fn test_single_slot() {
        let store = SnapshotStore::new();
        let mut state = DeviceState::default();
        store.save("a", &state, "first");

        state.apply(LampCommand::Rgb { r: 1, g: 1, b: 1 });
        store.save("a", &state, "second");

        let snap = store.latest("a").unwrap();
        assert_eq!(snap.reason, "second");
        assert_eq!(snap.state.rgb(), Some(Rgb::new(1, 1, 1)));
        assert!(store.latest("b").is_none());
    }
}
