//! Wire messages exchanged with observers
//!
//! Inbound: `{"action": "...", "payload": {...}}` (an optional
//! `"type": "command"` is accepted). Outbound: tagged by `"type"`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lamp_transport::LampCommand;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ControlError, Result};
use crate::registry::Device;
use crate::state::{DeviceState, Rgb, WhiteBalance};

/// Serialized form of [`DeviceState`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateView {
    pub power_on: bool,
    pub brightness: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rgb: Option<Rgb>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub white_balance: Option<WhiteBalance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect_speed: Option<u8>,
    pub last_updated: DateTime<Utc>,
}

impl From<&DeviceState> for StateView {
    fn from(state: &DeviceState) -> Self {
        let effect = state.effect();
        Self {
            power_on: state.power,
            brightness: state.brightness,
            rgb: state.rgb(),
            white_balance: state.white_balance(),
            effect: effect.map(|(index, _)| index),
            effect_speed: effect.map(|(_, speed)| speed),
            last_updated: state.last_updated,
        }
    }
}

/// Serialized form of [`Device`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceView {
    pub address: String,
    pub name: String,
    pub rssi: i16,
    pub connected: bool,
    pub state: StateView,
    pub last_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl From<&Device> for DeviceView {
    fn from(device: &Device) -> Self {
        Self {
            address: device.address.clone(),
            name: device.name.clone(),
            rssi: device.rssi,
            connected: device.is_connected(),
            state: StateView::from(&device.state),
            last_seen: device.last_seen,
            last_updated: device.last_updated,
        }
    }
}

/// Running viewer effect, as reported to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveEffectView {
    pub requester: String,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub remaining_secs: u64,
}

/// Messages pushed to observers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    StateUpdate {
        device: DeviceView,
    },
    Error {
        message: String,
        code: String,
    },
    ScanResult {
        devices: Vec<DeviceView>,
    },
    ViewerCommand {
        requester: String,
        command: String,
    },
    ViewerStatus {
        running: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        active_effect: Option<ActiveEffectView>,
    },
}

impl ServerMessage {
    pub fn state_update(device: &Device) -> Self {
        Self::StateUpdate {
            device: device.into(),
        }
    }

    pub fn error(err: &ControlError) -> Self {
        Self::Error {
            message: err.to_string(),
            code: err.code().to_string(),
        }
    }

    pub fn scan_result(devices: &[Device]) -> Self {
        Self::ScanResult {
            devices: devices.iter().map(DeviceView::from).collect(),
        }
    }

    /// Encode once for fan-out to every observer
    pub fn to_payload(&self) -> serde_json::Result<Arc<str>> {
        serde_json::to_string(self).map(Arc::from)
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    action: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
struct PowerPayload {
    on: bool,
}

#[derive(Deserialize)]
struct BrightnessPayload {
    level: u8,
}

#[derive(Deserialize)]
struct EffectPayload {
    effect: u8,
    speed: u8,
}

/// A validated observer command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Power { on: bool },
    Color(Rgb),
    Brightness { level: u8 },
    WhiteBalance(WhiteBalance),
    Effect { effect: u8, speed: u8 },
}

impl ControlCommand {
    /// Parse and validate a raw inbound message.
    ///
    /// Out-of-range values fail the payload check since every field is a `u8`.
    pub fn parse(raw: &str) -> Result<Self> {
        let envelope: Envelope =
            serde_json::from_str(raw).map_err(|e| ControlError::InvalidFormat(e.to_string()))?;
        if let Some(kind) = envelope.kind.as_deref() {
            if kind != "command" {
                return Err(ControlError::InvalidFormat(format!(
                    "unexpected message type {kind:?}"
                )));
            }
        }

        let action = envelope.action.as_str();
        let payload = envelope.payload;
        let invalid = |_| ControlError::InvalidPayload(action.to_string());

        match action {
            "power" => serde_json::from_value::<PowerPayload>(payload)
                .map(|p| Self::Power { on: p.on })
                .map_err(invalid),
            "color" => serde_json::from_value::<Rgb>(payload)
                .map(Self::Color)
                .map_err(invalid),
            "brightness" => serde_json::from_value::<BrightnessPayload>(payload)
                .map(|p| Self::Brightness { level: p.level })
                .map_err(invalid),
            "white_balance" => serde_json::from_value::<WhiteBalance>(payload)
                .map(Self::WhiteBalance)
                .map_err(invalid),
            "effect" => serde_json::from_value::<EffectPayload>(payload)
                .map(|p| Self::Effect {
                    effect: p.effect,
                    speed: p.speed,
                })
                .map_err(invalid),
            other => Err(ControlError::UnknownAction(other.to_string())),
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Self::Power { .. } => "power",
            Self::Color(_) => "color",
            Self::Brightness { .. } => "brightness",
            Self::WhiteBalance(_) => "white_balance",
            Self::Effect { .. } => "effect",
        }
    }

    pub fn lamp_command(&self) -> LampCommand {
        match *self {
            Self::Power { on } => LampCommand::Power(on),
            Self::Color(Rgb { r, g, b }) => LampCommand::Rgb { r, g, b },
            Self::Brightness { level } => LampCommand::Brightness(level),
            Self::WhiteBalance(WhiteBalance { warm, cold }) => {
                LampCommand::WhiteBalance { warm, cold }
            }
            Self::Effect { effect, speed } => LampCommand::Effect {
                index: effect,
                speed,
            },
        }
    }
}
