//! Control core for ELK-BLEDOM style lamps
//!
//! Builds on `lamp-transport` and provides:
//! - the device registry and its confirmed state store
//! - the realtime hub that fans state out to observers
//! - the viewer effect orchestrator with cooldowns and timed restore

pub mod catalog;
pub mod chat;
pub mod cooldown;
pub mod error;
pub mod hub;
pub mod message;
pub mod registry;
pub mod selection;
pub mod snapshot;
pub mod state;
pub mod viewer;

pub use chat::{ChatAdapter, ChatError, ViewerRequest};
pub use cooldown::{BypassPolicy, CooldownKind, CooldownRejection, Privileges};
pub use error::ControlError;
pub use hub::{ClientConnection, ClientId, Hub, HubConfig};
pub use message::{ControlCommand, DeviceView, ServerMessage, StateView};
pub use registry::{Device, DeviceRegistry};
pub use selection::{DeviceSelector, Selection};
pub use state::{DeviceState, Look, Rgb, WhiteBalance};
pub use viewer::{ActiveEffectInfo, Outcome, ViewerConfig, ViewerEffects};

// Re-export the link layer so callers need a single dependency
pub use lamp_transport;
