//! Lamp discovery

use std::time::Duration;

use super::{CommandResult, Context};

pub async fn scan(ctx: &Context, timeout_secs: Option<u64>) -> CommandResult {
    let timeout = timeout_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| ctx.config.link.scan_timeout());

    println!("Scanning for {}s...", timeout.as_secs());
    let devices = ctx.registry.scan(timeout).await?;

    if devices.is_empty() {
        println!("No lamps found");
        return Ok(());
    }

    println!("{:<20} {:>6}  NAME", "ADDRESS", "RSSI");
    for device in &devices {
        println!(
            "{:<20} {:>6}  {}",
            device.address,
            device.rssi,
            if device.name.is_empty() {
                "(unnamed)"
            } else {
                device.name.as_str()
            }
        );
    }
    println!("{} lamp(s) found", devices.len());
    Ok(())
}
