//! Realtime hub
//!
//! One loop task owns the observer set. Registration, unregistration and
//! fan-out all happen inside it, so the set needs no lock. Each observer
//! has a bounded queue; an observer whose queue is full when a message is
//! fanned out is dropped and its queue closed.
//!
//! Commands are validated in the loop and handed to a single worker task,
//! which executes them in arrival order and broadcasts the confirmed state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ControlError, Result};
use crate::message::{ControlCommand, ServerMessage};
use crate::registry::DeviceRegistry;
use crate::selection::DeviceSelector;

pub type ClientId = u64;

/// Queue sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Outbound messages buffered per observer
    pub client_queue_size: usize,
    /// Validated commands waiting for the worker
    pub command_queue_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            client_queue_size: 256,
            command_queue_size: 256,
        }
    }
}

enum HubMessage {
    Register {
        queue: mpsc::Sender<Arc<str>>,
        reply: oneshot::Sender<ClientId>,
    },
    Unregister(ClientId),
    Broadcast(Arc<str>),
    Reply {
        client: ClientId,
        payload: Arc<str>,
    },
    Command {
        client: ClientId,
        raw: String,
    },
    ClientCount(oneshot::Sender<usize>),
    Shutdown,
}

struct Job {
    client: ClientId,
    command: ControlCommand,
}

/// Handle to the hub loop
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::Sender<HubMessage>,
    registry: Arc<DeviceRegistry>,
    selector: Arc<dyn DeviceSelector>,
    config: HubConfig,
}

impl Hub {
    /// Start the loop and the command worker
    pub fn spawn(
        registry: Arc<DeviceRegistry>,
        selector: Arc<dyn DeviceSelector>,
        config: HubConfig,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.command_queue_size.max(1));
        let (job_tx, job_rx) = mpsc::channel(config.command_queue_size.max(1));

        tokio::spawn(run_worker(
            job_rx,
            tx.downgrade(),
            registry.clone(),
            selector.clone(),
        ));
        let task = tokio::spawn(run_loop(rx, job_tx));
        info!("Hub started");

        (
            Self {
                tx,
                registry,
                selector,
                config,
            },
            task,
        )
    }

    /// Register a new observer
    pub async fn register_client(&self) -> Result<ClientConnection> {
        let (queue, rx) = mpsc::channel(self.config.client_queue_size.max(1));
        let (reply, id) = oneshot::channel();
        self.send(HubMessage::Register { queue, reply }).await?;
        let id = id.await.map_err(|_| ControlError::HubClosed)?;
        Ok(ClientConnection {
            id,
            rx,
            hub: self.tx.clone(),
        })
    }

    /// Submit a raw inbound command on behalf of `client`.
    ///
    /// Validation errors and command failures are replied to `client` only.
    pub async fn submit(&self, client: ClientId, raw: impl Into<String>) -> Result<()> {
        self.send(HubMessage::Command {
            client,
            raw: raw.into(),
        })
        .await
    }

    /// Fan a message out to every observer
    pub async fn broadcast_message(&self, message: &ServerMessage) -> Result<()> {
        let payload = encode(message)?;
        self.send(HubMessage::Broadcast(payload)).await
    }

    /// Broadcast the stored state of the selected device
    pub async fn broadcast_current_device_state(&self) -> Result<()> {
        let address = self.selector.selected()?;
        let device = self.registry.get(&address)?;
        self.broadcast_message(&ServerMessage::state_update(&device))
            .await
    }

    pub async fn client_count(&self) -> Result<usize> {
        let (reply, count) = oneshot::channel();
        self.send(HubMessage::ClientCount(reply)).await?;
        count.await.map_err(|_| ControlError::HubClosed)
    }

    /// Stop the loop; every observer queue is closed
    pub async fn shutdown(&self) {
        // Already stopped is fine
        let _ = self.tx.send(HubMessage::Shutdown).await;
    }

    async fn send(&self, message: HubMessage) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| ControlError::HubClosed)
    }
}

/// One registered observer
pub struct ClientConnection {
    id: ClientId,
    rx: mpsc::Receiver<Arc<str>>,
    hub: mpsc::Sender<HubMessage>,
}

impl ClientConnection {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Next outbound message; None once the hub dropped this observer
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.rx.recv().await
    }

    /// Submit a raw command as this observer
    pub async fn submit(&self, raw: impl Into<String>) -> Result<()> {
        self.hub
            .send(HubMessage::Command {
                client: self.id,
                raw: raw.into(),
            })
            .await
            .map_err(|_| ControlError::HubClosed)
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        // If the inbox is full the loop still prunes us on the next send
        let _ = self.hub.try_send(HubMessage::Unregister(self.id));
    }
}

fn encode(message: &ServerMessage) -> Result<Arc<str>> {
    message
        .to_payload()
        .map_err(|e| ControlError::InvalidFormat(e.to_string()))
}

async fn run_loop(mut rx: mpsc::Receiver<HubMessage>, jobs: mpsc::Sender<Job>) {
    let mut clients: HashMap<ClientId, mpsc::Sender<Arc<str>>> = HashMap::new();
    let mut next_id: ClientId = 1;

    while let Some(message) = rx.recv().await {
        match message {
            HubMessage::Register { queue, reply } => {
                let id = next_id;
                next_id += 1;
                clients.insert(id, queue);
                debug!("Observer {} registered ({} total)", id, clients.len());
                let _ = reply.send(id);
            }
            HubMessage::Unregister(id) => {
                if clients.remove(&id).is_some() {
                    debug!("Observer {} unregistered ({} left)", id, clients.len());
                }
            }
            HubMessage::Broadcast(payload) => {
                clients.retain(|id, queue| deliver(*id, queue, payload.clone()));
            }
            HubMessage::Reply { client, payload } => {
                reply_to(&mut clients, client, payload);
            }
            HubMessage::Command { client, raw } => match ControlCommand::parse(&raw) {
                Ok(command) => {
                    debug!("Observer {} sent {}", client, command.action());
                    if let Err(e) = jobs.try_send(Job { client, command }) {
                        let reason = match e {
                            TrySendError::Full(_) => "command queue is full",
                            TrySendError::Closed(_) => "command worker stopped",
                        };
                        warn!("Dropping command from observer {}: {}", client, reason);
                        if let Ok(payload) = encode(&ServerMessage::Error {
                            message: reason.to_string(),
                            code: "COMMAND_FAILED".to_string(),
                        }) {
                            reply_to(&mut clients, client, payload);
                        }
                    }
                }
                Err(e) => {
                    debug!("Rejected command from observer {}: {}", client, e);
                    if let Ok(payload) = encode(&ServerMessage::error(&e)) {
                        reply_to(&mut clients, client, payload);
                    }
                }
            },
            HubMessage::ClientCount(reply) => {
                let _ = reply.send(clients.len());
            }
            HubMessage::Shutdown => break,
        }
    }

    info!("Hub stopped, closing {} observer(s)", clients.len());
}

/// Enqueue without waiting. Returns false when the observer must be dropped.
fn deliver(id: ClientId, queue: &mpsc::Sender<Arc<str>>, payload: Arc<str>) -> bool {
    match queue.try_send(payload) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!("Observer {} is not keeping up, dropping it", id);
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!("Observer {} went away", id);
            false
        }
    }
}

fn reply_to(
    clients: &mut HashMap<ClientId, mpsc::Sender<Arc<str>>>,
    client: ClientId,
    payload: Arc<str>,
) {
    let keep = match clients.get(&client) {
        Some(queue) => deliver(client, queue, payload),
        None => return,
    };
    if !keep {
        clients.remove(&client);
    }
}

async fn run_worker(
    mut jobs: mpsc::Receiver<Job>,
    hub: mpsc::WeakSender<HubMessage>,
    registry: Arc<DeviceRegistry>,
    selector: Arc<dyn DeviceSelector>,
) {
    while let Some(Job { client, command }) = jobs.recv().await {
        let outcome = match selector.selected() {
            Ok(address) => registry.execute(&address, command.lamp_command()).await,
            Err(e) => Err(e),
        };

        let message = match outcome {
            Ok(device) => match encode(&ServerMessage::state_update(&device)) {
                Ok(payload) => HubMessage::Broadcast(payload),
                Err(e) => {
                    warn!("Failed to encode state update: {}", e);
                    continue;
                }
            },
            Err(e) => {
                warn!("{} command from observer {} failed: {}", command.action(), client, e);
                match encode(&ServerMessage::error(&e)) {
                    Ok(payload) => HubMessage::Reply { client, payload },
                    Err(_) => continue,
                }
            }
        };

        let Some(hub) = hub.upgrade() else {
            break;
        };
        if hub.send(message).await.is_err() {
            break;
        }
    }
    debug!("Hub command worker stopped");
}
