// CLI definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use lamp_control::Rgb;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lampctl")]
#[command(author, version, about = "Control ELK-BLEDOM Bluetooth LED lamps")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Lamp address (MAC on Linux)
    #[arg(short, long, global = true)]
    pub device: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log every frame written to the lamp
    #[arg(long, global = true)]
    pub monitor: bool,

    /// Drive simulated lamps instead of the Bluetooth adapter
    #[arg(long, global = true)]
    pub simulate: bool,

    /// Config file (default: $XDG_CONFIG_HOME/lampctl/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PowerState {
    On,
    Off,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan for nearby lamps
    #[command(visible_alias = "s")]
    Scan {
        /// Scan duration in seconds (default from config)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Turn the lamp on or off
    #[command(visible_alias = "p")]
    Power {
        #[arg(value_enum)]
        state: PowerState,
    },

    /// Set an RGB colour
    #[command(visible_alias = "c")]
    Color {
        /// Colour as R,G,B (each 0-255)
        #[arg(short, long, value_parser = parse_rgb)]
        rgb: Rgb,
    },

    /// Set brightness
    #[command(visible_aliases = ["bright", "b"])]
    Brightness {
        /// Level (0-255)
        #[arg(value_parser = clap::value_parser!(u8))]
        level: u8,
    },

    /// Set warm/cold white balance
    #[command(visible_alias = "w")]
    White {
        /// Warm white intensity (0-255)
        #[arg(long, default_value = "128")]
        warm: u8,
        /// Cold white intensity (0-255)
        #[arg(long, default_value = "128")]
        cold: u8,
    },

    /// Start a built-in effect
    #[command(visible_alias = "e")]
    Effect {
        /// Effect index (0-255)
        index: u8,
        /// Effect speed (0-255)
        #[arg(short, long, default_value = "128")]
        speed: u8,
    },

    /// Run the hub and viewer effects, reading commands from stdin
    ///
    /// Lines like `alice+vip: !lamp red` are viewer chat messages; lines
    /// starting with `{` are observer commands such as
    /// `{"action":"power","payload":{"on":true}}`.
    Serve {
        /// Enable viewer effects regardless of the config file
        #[arg(long)]
        viewer: bool,
    },
}

/// Parse `R,G,B` with each component in 0-255
pub fn parse_rgb(s: &str) -> Result<Rgb, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [r, g, b] = parts.as_slice() else {
        return Err("expected R,G,B where each value is 0-255".to_string());
    };
    let component = |v: &str| {
        v.parse::<u8>()
            .map_err(|_| format!("invalid colour component {v:?} (must be 0-255)"))
    };
    Ok(Rgb::new(component(*r)?, component(*g)?, component(*b)?))
}
