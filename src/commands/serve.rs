//! `lampctl serve`: hub and viewer effects on the console
//!
//! Every hub broadcast is printed as a JSON line. Stdin lines are either
//! viewer chat (`alice+vip: !lamp red`) or observer commands (JSON).

use std::io::BufReader;
use std::sync::Arc;

use anyhow::{bail, Context as _};
use lamp_control::{Hub, Selection, ServerMessage, ViewerEffects};
use lampctl::console::{parse_console_line, spawn_line_reader, ConsoleChat, ConsoleInput};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{CommandResult, Context};

pub async fn serve(ctx: &Context, force_viewer: bool) -> CommandResult {
    let address = pick_device(ctx).await?;

    let selection = Arc::new(Selection::new(ctx.registry.clone()));
    selection.select(&address)?;

    let watcher = ctx.link.watch_events();
    let (hub, hub_task) = Hub::spawn(
        ctx.registry.clone(),
        selection.clone(),
        ctx.config.hub.hub_config(),
    );

    let mut viewer_config = ctx.config.viewer.clone();
    if force_viewer {
        viewer_config.enabled = true;
    }
    let viewer = Arc::new(
        ViewerEffects::new(
            ctx.registry.clone(),
            selection,
            Arc::new(ConsoleChat),
            viewer_config,
        )
        .with_hub(hub.clone()),
    );

    // The console itself is an observer
    let mut console = hub.register_client().await?;
    let console_id = console.id();
    let printer = tokio::spawn(async move {
        while let Some(message) = console.recv().await {
            println!("[hub] {message}");
        }
    });

    if viewer.config().enabled {
        viewer.start().await?;
        println!("Viewer commands: {}", viewer.catalog().join(", "));
    } else {
        info!("Viewer effects disabled (set viewer.enabled or pass --viewer)");
    }

    hub.broadcast_message(&ServerMessage::scan_result(&ctx.registry.list()))
        .await?;
    hub.broadcast_current_device_state().await?;

    let (stop_tx, mut stop_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(true);
    })
    .context("failed to install Ctrl-C handler")?;

    let mut lines = spawn_line_reader(BufReader::new(std::io::stdin()))
        .context("failed to start console reader")?;

    println!("Serving {address}. Ctrl-C or EOF to stop.");
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            line = lines.recv() => {
                let Some(line) = line else {
                    break;
                };
                match parse_console_line(&line) {
                    Some(ConsoleInput::Viewer(request)) => {
                        let viewer = viewer.clone();
                        tokio::spawn(async move {
                            let outcome = viewer.handle(&request).await;
                            debug!("{} -> {:?}", request.requester, outcome);
                        });
                    }
                    Some(ConsoleInput::Observer(raw)) => {
                        if let Err(e) = hub.submit(console_id, raw).await {
                            warn!("Hub rejected input: {}", e);
                        }
                    }
                    None => debug!("Ignoring input line {:?}", line),
                }
            }
        }
    }

    info!("Shutting down");
    viewer.stop().await;
    hub.shutdown().await;
    if let Err(e) = hub_task.await {
        warn!("Hub task ended abnormally: {}", e);
    }
    // Ends once the hub closed our queue
    let _ = printer.await;
    if let Some(watcher) = watcher {
        watcher.abort();
    }
    ctx.close().await;
    Ok(())
}

/// `--device` if given, otherwise the strongest lamp found by a scan
async fn pick_device(ctx: &Context) -> anyhow::Result<String> {
    if ctx.device.is_some() {
        return ctx.target();
    }

    let timeout = ctx.config.link.scan_timeout();
    println!("No --device given, scanning for {}s...", timeout.as_secs());
    let found = ctx.registry.scan(timeout).await?;
    let Some(best) = found.iter().max_by_key(|d| d.rssi) else {
        bail!("no lamps found (pass --device to skip scanning)");
    };
    println!("Using {} ({}, rssi {})", best.address, best.name, best.rssi);
    Ok(best.address.clone())
}
