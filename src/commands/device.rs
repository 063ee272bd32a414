//! One-shot lamp commands

use anyhow::Context as _;
use lamp_control::{Device, Rgb, WhiteBalance};

use super::{CommandResult, Context};

async fn run<F, Fut>(ctx: &Context, describe: String, f: F) -> CommandResult
where
    F: FnOnce(String) -> Fut,
    Fut: std::future::Future<Output = lamp_control::error::Result<Device>>,
{
    let address = ctx.target()?;
    println!("{describe} on {address}...");

    let result = f(address.clone()).await;
    ctx.close().await;

    let device = result.with_context(|| format!("failed to {describe}"))?;
    println!("Done ({})", summary(&device));
    Ok(())
}

fn summary(device: &Device) -> String {
    let state = &device.state;
    let look = if let Some(rgb) = state.rgb() {
        rgb.to_string()
    } else if let Some(wb) = state.white_balance() {
        format!("white warm={} cold={}", wb.warm, wb.cold)
    } else if let Some((index, speed)) = state.effect() {
        format!("effect {index} speed {speed}")
    } else {
        "unknown colour".to_string()
    };
    format!(
        "power {}, brightness {}, {}",
        if state.power { "on" } else { "off" },
        state.brightness,
        look
    )
}

pub async fn power(ctx: &Context, on: bool) -> CommandResult {
    let word = if on { "on" } else { "off" };
    run(ctx, format!("turn {word}"), |address| async move {
        ctx.registry.set_power(&address, on).await
    })
    .await
}

pub async fn color(ctx: &Context, rgb: Rgb) -> CommandResult {
    run(ctx, format!("set colour {rgb}"), |address| async move {
        ctx.registry.set_color(&address, rgb).await
    })
    .await
}

pub async fn brightness(ctx: &Context, level: u8) -> CommandResult {
    run(ctx, format!("set brightness {level}"), |address| async move {
        ctx.registry.set_brightness(&address, level).await
    })
    .await
}

pub async fn white(ctx: &Context, warm: u8, cold: u8) -> CommandResult {
    run(
        ctx,
        format!("set white balance warm={warm} cold={cold}"),
        |address| async move {
            ctx.registry
                .set_white_balance(&address, WhiteBalance { warm, cold })
                .await
        },
    )
    .await
}

pub async fn effect(ctx: &Context, index: u8, speed: u8) -> CommandResult {
    run(
        ctx,
        format!("start effect {index} at speed {speed}"),
        |address| async move { ctx.registry.set_effect(&address, index, speed).await },
    )
    .await
}
