//! Viewer effect orchestration
//!
//! Chat viewers can take over the selected lamp for a limited time. Per
//! device the orchestrator moves `Idle -> Active -> Idle`:
//!
//! - the first accepted request snapshots the current state, applies the
//!   requested look and schedules a revert
//! - further requests while active apply their look and reschedule the
//!   revert but keep the original snapshot
//! - when the revert fires the snapshot's look is restored
//!
//! Transitions for one device are serialized by a per-address lock held
//! across the lamp write. The marker map is only locked for bookkeeping, so
//! status reads and other devices never wait on lamp I/O. Each marker carries
//! a generation, and a revert whose generation was superseded does nothing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::catalog::{self, ViewerCommand};
use crate::chat::{ChatAdapter, ViewerRequest};
use crate::cooldown::{
    ceil_secs, BypassPolicy, CooldownManager, CooldownPolicy, CooldownRejection,
};
use crate::error::{ControlError, Result};
use crate::hub::Hub;
use crate::message::{ActiveEffectView, ServerMessage};
use crate::registry::DeviceRegistry;
use crate::selection::DeviceSelector;
use crate::snapshot::SnapshotStore;
use crate::state::Look;

/// Shortest allowed override
pub const MIN_EFFECT_DURATION: Duration = Duration::from_secs(5);

/// Speed used for effects picked by viewers
pub const DEFAULT_EFFECT_SPEED: u8 = 128;

const SNAPSHOT_REASON: &str = "viewer_command";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub enabled: bool,
    pub effect_duration_secs: u64,
    pub global_cooldown_secs: u64,
    pub user_cooldown_secs: u64,
    pub effect_speed: u8,
    pub bypass: BypassPolicy,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            effect_duration_secs: 30,
            global_cooldown_secs: 5,
            user_cooldown_secs: 30,
            effect_speed: DEFAULT_EFFECT_SPEED,
            bypass: BypassPolicy::default(),
        }
    }
}

impl ViewerConfig {
    pub fn effect_duration(&self) -> Duration {
        Duration::from_secs(self.effect_duration_secs)
    }

    pub fn cooldown_policy(&self) -> CooldownPolicy {
        CooldownPolicy {
            global: Duration::from_secs(self.global_cooldown_secs),
            user: Duration::from_secs(self.user_cooldown_secs),
            bypass: self.bypass,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.effect_duration() < MIN_EFFECT_DURATION {
            return Err(ControlError::Config(format!(
                "effect duration must be at least {} seconds",
                MIN_EFFECT_DURATION.as_secs()
            )));
        }
        Ok(())
    }
}

/// Result of one viewer request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied { command: String, duration: Duration },
    CoolingDown(CooldownRejection),
    UnknownCommand(String),
    Failed(String),
    /// Integration not running, the request is ignored silently
    Disabled,
}

impl Outcome {
    /// Chat reply for this outcome, if any
    pub fn reply(&self, request: &ViewerRequest) -> Option<String> {
        let name = &request.display_name;
        match self {
            Self::Applied { command, duration } => Some(format!(
                "@{name} Lamp set to {command} for {} seconds!",
                duration.as_secs()
            )),
            Self::CoolingDown(rejection) => Some(format!(
                "@{} Please wait {} seconds ({} cooldown)",
                request.requester,
                rejection.remaining_secs(),
                rejection.kind
            )),
            Self::UnknownCommand(command) => {
                Some(format!("@{name} Unknown lamp command: {command}"))
            }
            Self::Failed(error) => Some(format!("@{name} Sorry, that command failed: {error}")),
            Self::Disabled => None,
        }
    }
}

struct ActiveEffect {
    requester: String,
    command: String,
    started_at: DateTime<Utc>,
    started: Instant,
    duration: Duration,
    generation: u64,
    revert: JoinHandle<()>,
}

/// Read-only view of a running override
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveEffectInfo {
    pub address: String,
    pub requester: String,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub remaining: Duration,
}

impl ActiveEffectInfo {
    pub fn to_view(&self) -> ActiveEffectView {
        ActiveEffectView {
            requester: self.requester.clone(),
            command: self.command.clone(),
            started_at: self.started_at,
            remaining_secs: ceil_secs(self.remaining),
        }
    }
}

pub struct ViewerEffects {
    registry: Arc<DeviceRegistry>,
    selector: Arc<dyn DeviceSelector>,
    chat: Arc<dyn ChatAdapter>,
    hub: Option<Hub>,
    config: RwLock<ViewerConfig>,
    cooldowns: CooldownManager,
    snapshots: SnapshotStore,
    /// Never held across `.await`
    active: RwLock<HashMap<String, ActiveEffect>>,
    /// One per address, held across a whole transition including the write
    transitions: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    generation: AtomicU64,
    running: AtomicBool,
}

impl ViewerEffects {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        selector: Arc<dyn DeviceSelector>,
        chat: Arc<dyn ChatAdapter>,
        config: ViewerConfig,
    ) -> Self {
        Self {
            registry,
            selector,
            chat,
            hub: None,
            cooldowns: CooldownManager::new(config.cooldown_policy()),
            config: RwLock::new(config),
            snapshots: SnapshotStore::new(),
            active: RwLock::new(HashMap::new()),
            transitions: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            running: AtomicBool::new(false),
        }
    }

    /// Publish state changes and accepted commands through `hub`
    pub fn with_hub(mut self, hub: Hub) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn config(&self) -> ViewerConfig {
        self.config.read().clone()
    }

    /// Replace the configuration; takes effect for the next request
    pub fn update_config(&self, config: ViewerConfig) -> Result<()> {
        config.validate()?;
        self.cooldowns.set_policy(config.cooldown_policy());
        *self.config.write() = config;
        Ok(())
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Command names viewers can use
    pub fn catalog(&self) -> Vec<&'static str> {
        catalog::colors().chain(catalog::effects()).collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start accepting requests
    pub async fn start(&self) -> Result<()> {
        let config = self.config();
        if !config.enabled {
            return Err(ControlError::Config("viewer effects are disabled".into()));
        }
        config.validate()?;
        self.cooldowns.set_policy(config.cooldown_policy());
        // Every run starts with fresh cooldowns
        self.cooldowns.reset();
        self.running.store(true, Ordering::SeqCst);
        info!(
            "Viewer effects started ({}s per effect)",
            config.effect_duration_secs
        );
        self.broadcast(self.status().await).await;
        Ok(())
    }

    /// Stop accepting requests.
    ///
    /// Pending reverts are cancelled, markers and their snapshots cleared;
    /// lamps keep whatever look they currently show.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let drained: Vec<(String, ActiveEffect)> = self.active.write().drain().collect();
        for (address, effect) in drained {
            effect.revert.abort();
            self.snapshots.clear(&address);
            debug!("Cancelled revert for {}", address);
        }
        info!("Viewer effects stopped");
        self.broadcast(self.status().await).await;
    }

    /// Running override on the selected device
    pub async fn active_effect(&self) -> Option<ActiveEffectInfo> {
        let address = self.selector.selected().ok()?;
        let active = self.active.read();
        let effect = active.get(&address)?;
        Some(ActiveEffectInfo {
            address,
            requester: effect.requester.clone(),
            command: effect.command.clone(),
            started_at: effect.started_at,
            remaining: effect.duration.saturating_sub(effect.started.elapsed()),
        })
    }

    pub async fn status(&self) -> ServerMessage {
        ServerMessage::ViewerStatus {
            running: self.is_running(),
            active_effect: self.active_effect().await.map(|e| e.to_view()),
        }
    }

    /// Process a request and reply in chat
    pub async fn handle(self: &Arc<Self>, request: &ViewerRequest) -> Outcome {
        let outcome = self.process(request).await;
        if let Some(text) = outcome.reply(request) {
            if let Err(e) = self.chat.send_reply(&text).await {
                warn!("Failed to reply to {}: {}", request.requester, e);
            }
        }
        outcome
    }

    /// Process a request without replying
    pub async fn process(self: &Arc<Self>, request: &ViewerRequest) -> Outcome {
        if !self.is_running() {
            return Outcome::Disabled;
        }
        let Some(command) = ViewerCommand::resolve(&request.command) else {
            return Outcome::UnknownCommand(request.command.clone());
        };
        let name = request.command.trim().to_lowercase();
        let config = self.config();

        // Cooldown check and record must not interleave with another request
        // for the same lamp, so the lock is taken before the check
        let selected = self.selector.selected();
        let transition = selected.as_ref().ok().map(|a| self.transition_lock(a));
        let _transition = match &transition {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        if let Err(rejection) = self
            .cooldowns
            .check(&request.requester, &request.privileges)
        {
            debug!(
                "{} rejected: {} cooldown, {:?} left",
                request.requester, rejection.kind, rejection.remaining
            );
            return Outcome::CoolingDown(rejection);
        }

        let address = match selected {
            Ok(address) => address,
            Err(e) => return Outcome::Failed(e.to_string()),
        };

        // Only the first override in a chain captures the state to return to
        if !self.active.read().contains_key(&address) {
            match self.registry.get(&address) {
                Ok(device) => self
                    .snapshots
                    .save(&address, &device.state, SNAPSHOT_REASON),
                Err(e) => return Outcome::Failed(e.to_string()),
            }
        }

        let look = match command {
            ViewerCommand::Color(rgb) => Look::Rgb(rgb),
            ViewerCommand::Effect(index) => Look::Effect {
                index,
                speed: config.effect_speed,
            },
        };
        let device = match self.registry.apply_look(&address, look).await {
            Ok(device) => device,
            Err(e) => {
                warn!("Viewer command {} from {} failed: {}", name, request.requester, e);
                return Outcome::Failed(e.to_string());
            }
        };

        self.cooldowns.record(&request.requester);

        let duration = config.effect_duration();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut active = self.active.write();
            // `stop` clears the flag before draining the map
            if self.is_running() {
                let marker = ActiveEffect {
                    requester: request.requester.clone(),
                    command: name.clone(),
                    started_at: Utc::now(),
                    started: Instant::now(),
                    duration,
                    generation,
                    revert: self.schedule_revert(address.clone(), generation, duration),
                };
                if let Some(previous) = active.insert(address.clone(), marker) {
                    previous.revert.abort();
                    debug!("{} superseded {}'s effect", request.requester, previous.requester);
                }
            } else {
                debug!("Stopped during {}'s write, no revert scheduled", request.requester);
            }
        }

        info!("{} set {} to {} for {:?}", request.requester, address, name, duration);
        self.broadcast(ServerMessage::state_update(&device)).await;
        self.broadcast(ServerMessage::ViewerCommand {
            requester: request.requester.clone(),
            command: name.clone(),
        })
        .await;

        Outcome::Applied {
            command: name,
            duration,
        }
    }

    fn schedule_revert(
        self: &Arc<Self>,
        address: String,
        generation: u64,
        after: Duration,
    ) -> JoinHandle<()> {
        let this = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(this) = this.upgrade() {
                this.revert(&address, generation).await;
            }
        })
    }

    fn transition_lock(&self, address: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.transitions
            .lock()
            .entry(address.to_string())
            .or_default()
            .clone()
    }

    fn is_current(&self, address: &str, generation: u64) -> bool {
        matches!(self.active.read().get(address), Some(e) if e.generation == generation)
    }

    async fn revert(&self, address: &str, generation: u64) {
        let lock = self.transition_lock(address);
        let _transition = lock.lock().await;
        if !self.is_current(address, generation) {
            return;
        }

        let look = self.snapshots.latest(address).and_then(|s| s.state.look);
        let restored = match look {
            Some(look) => match self.registry.apply_look(address, look).await {
                Ok(device) => Some(device),
                Err(e) => {
                    warn!("Failed to restore {}: {}", address, e);
                    None
                }
            },
            None => {
                warn!("No snapshot to restore for {}", address);
                None
            }
        };
        {
            let mut active = self.active.write();
            if matches!(active.get(address), Some(e) if e.generation == generation) {
                active.remove(address);
            }
        }
        self.snapshots.clear(address);

        if let Some(device) = restored {
            info!("Restored {}", address);
            self.broadcast(ServerMessage::state_update(&device)).await;
        }
    }

    async fn broadcast(&self, message: ServerMessage) {
        if let Some(hub) = &self.hub {
            if let Err(e) = hub.broadcast_message(&message).await {
                debug!("Broadcast skipped: {}", e);
            }
        }
    }
}
