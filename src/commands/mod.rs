//! Command handlers for the CLI application.
//!
//! - `device`: one-shot lamp commands (power, color, brightness, white, effect)
//! - `scan`: discovery
//! - `serve`: hub plus viewer effects driven from stdin

pub mod device;
pub mod scan;
pub mod serve;

use std::sync::Arc;

use anyhow::{bail, Context as _};
use lamp_control::DeviceRegistry;
use lamp_transport::{BoxedLink, ConnectionManager, MonitorLink, SimLink};
use lampctl::Config;
use tracing::debug;

use crate::cli::Cli;

/// Result type for command handlers
pub type CommandResult = anyhow::Result<()>;

/// Address of the lamp `--simulate` always provides
pub const SIM_ADDRESS: &str = "BE:EF:00:00:00:01";
const SIM_NAME: &str = "ELK-BLEDOM (simulated)";

/// Everything a command needs: config, link and registry
pub struct Context {
    pub config: Config,
    pub device: Option<String>,
    pub link: Arc<ConnectionManager>,
    pub registry: Arc<DeviceRegistry>,
}

impl Context {
    pub async fn open(cli: &Cli) -> anyhow::Result<Self> {
        let config = match &cli.config {
            Some(path) => Config::load(path),
            None => Config::load_default(),
        }
        .context("failed to load config")?;

        let adapter = open_adapter(cli.simulate, cli.device.as_deref()).await?;
        let adapter: BoxedLink = if cli.monitor {
            Arc::new(MonitorLink::new(adapter))
        } else {
            adapter
        };

        let link = Arc::new(ConnectionManager::new(adapter, config.link.retry_policy()));
        let registry = Arc::new(DeviceRegistry::new(link.clone()));
        Ok(Self {
            config,
            device: cli.device.clone(),
            link,
            registry,
        })
    }

    /// The `--device` address, registered with the registry
    pub fn target(&self) -> anyhow::Result<String> {
        let Some(address) = self.device.clone() else {
            bail!("device address required (use --device or -d)");
        };
        self.registry.track(&address, "");
        Ok(address)
    }

    /// Disconnect every lamp, logging failures
    pub async fn close(&self) {
        self.link.disconnect_all().await;
    }
}

async fn open_adapter(simulate: bool, device: Option<&str>) -> anyhow::Result<BoxedLink> {
    if simulate {
        let sim = SimLink::new().with_lamp(SIM_ADDRESS, SIM_NAME, -42);
        if let Some(address) = device {
            sim.add_lamp(address, SIM_NAME, -42);
        }
        debug!("Using simulated link");
        return Ok(Arc::new(sim));
    }
    open_bluetooth().await
}

#[cfg(feature = "bluetooth")]
async fn open_bluetooth() -> anyhow::Result<BoxedLink> {
    let link = lamp_transport::BleLink::new()
        .await
        .context("failed to initialize Bluetooth adapter")?;
    Ok(Arc::new(link))
}

#[cfg(not(feature = "bluetooth"))]
async fn open_bluetooth() -> anyhow::Result<BoxedLink> {
    bail!("built without Bluetooth support (rebuild with --features bluetooth, or use --simulate)")
}
