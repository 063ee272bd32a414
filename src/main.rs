//! lampctl - ELK-BLEDOM lamp control CLI
//!
//! One-shot commands for a single lamp, plus `serve` which runs the hub and
//! the viewer effect orchestrator on the console.

use clap::Parser;
use tracing_subscriber::EnvFilter;

// CLI definitions
mod cli;
use cli::{Cli, Commands, PowerState};

// Command handlers
mod commands;
use commands::Context;

const LOG_DEFAULT: &str = "lampctl=info,lamp_control=info,lamp_transport=info";
const LOG_VERBOSE: &str = "lampctl=debug,lamp_control=debug,lamp_transport=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let ctx = Context::open(&cli).await?;

    match cli.command {
        Commands::Scan { timeout } => commands::scan::scan(&ctx, timeout).await?,
        Commands::Power { state } => {
            commands::device::power(&ctx, state == PowerState::On).await?
        }
        Commands::Color { rgb } => commands::device::color(&ctx, rgb).await?,
        Commands::Brightness { level } => commands::device::brightness(&ctx, level).await?,
        Commands::White { warm, cold } => commands::device::white(&ctx, warm, cold).await?,
        Commands::Effect { index, speed } => commands::device::effect(&ctx, index, speed).await?,
        Commands::Serve { viewer } => commands::serve::serve(&ctx, viewer).await?,
    }

    Ok(())
}

/// RUST_LOG wins over the built-in defaults
fn init_logging(verbose: bool) {
    let default = if verbose { LOG_VERBOSE } else { LOG_DEFAULT };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
