//! Integration tests for the `serve` pipeline.
//!
//! Config text, console lines, hub and viewer effects wired together over a
//! simulated lamp, the same way `lampctl serve --simulate` runs them.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use lamp_control::lamp_transport::{encode_power, encode_rgb, ConnectionManager, SimLink};
use lamp_control::{
    ClientConnection, DeviceRegistry, Hub, Outcome, Rgb, Selection, ViewerEffects,
};
use lampctl::console::{parse_console_line, ConsoleChat, ConsoleInput};
use lampctl::Config;
use serde_json::Value;

const LAMP: &str = "BE:EF:00:00:00:01";

const CONFIG: &str = r#"
[link]
retry_attempts = 2
retry_backoff_ms = 100

[hub]
client_queue_size = 16

[viewer]
enabled = true
effect_duration_secs = 10
global_cooldown_secs = 0
user_cooldown_secs = 0
"#;

struct Serve {
    sim: Arc<SimLink>,
    registry: Arc<DeviceRegistry>,
    hub: Hub,
    viewer: Arc<ViewerEffects>,
}

fn serve() -> Serve {
    let config = Config::from_toml_str(CONFIG, Path::new("serve.toml")).unwrap();
    let sim = Arc::new(SimLink::new().with_lamp(LAMP, "ELK-BLEDOM", -40));
    let link = Arc::new(ConnectionManager::new(sim.clone(), config.link.retry_policy()));
    let registry = Arc::new(DeviceRegistry::new(link));
    registry.track(LAMP, "ELK-BLEDOM");

    let selection = Arc::new(Selection::new(registry.clone()));
    selection.select(LAMP).unwrap();

    let (hub, _task) = Hub::spawn(
        registry.clone(),
        selection.clone(),
        config.hub.hub_config(),
    );
    let viewer = Arc::new(
        ViewerEffects::new(registry.clone(), selection, Arc::new(ConsoleChat), config.viewer)
            .with_hub(hub.clone()),
    );
    Serve {
        sim,
        registry,
        hub,
        viewer,
    }
}

/// Next message of the given type, skipping others
async fn next_of(client: &mut ClientConnection, kind: &str) -> Value {
    loop {
        let raw = client.recv().await.expect("hub closed");
        let value: Value = serde_json::from_str(&raw).unwrap();
        if value["type"] == kind {
            return value;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn observer_line_reaches_every_observer() {
    let s = serve();
    let sender = s.hub.register_client().await.unwrap();
    let mut watcher = s.hub.register_client().await.unwrap();

    let Some(ConsoleInput::Observer(raw)) =
        parse_console_line(r#"{"type":"command","action":"power","payload":{"on":true}}"#)
    else {
        panic!("expected observer input");
    };
    sender.submit(raw).await.unwrap();

    let update = next_of(&mut watcher, "state_update").await;
    assert_eq!(update["device"]["address"], LAMP);
    assert_eq!(update["device"]["state"]["power_on"], true);
    assert_eq!(
        s.sim.frames_for(LAMP),
        vec![encode_power(true).as_bytes().to_vec()]
    );
}

#[tokio::test(start_paused = true)]
async fn chat_line_applies_and_restores() {
    let s = serve();
    s.registry.set_color(LAMP, Rgb::new(1, 2, 3)).await.unwrap();
    s.viewer.start().await.unwrap();
    let mut watcher = s.hub.register_client().await.unwrap();

    let Some(ConsoleInput::Viewer(request)) = parse_console_line("Alice: !lamp blue") else {
        panic!("expected viewer request");
    };
    let outcome = s.viewer.handle(&request).await;
    assert!(matches!(outcome, Outcome::Applied { .. }), "{outcome:?}");

    let announced = next_of(&mut watcher, "viewer_command").await;
    assert_eq!(announced["requester"], "alice");
    assert_eq!(announced["command"], "blue");
    assert_eq!(
        s.registry.get(LAMP).unwrap().state.rgb(),
        Some(Rgb::new(0, 0, 255))
    );

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(
        s.registry.get(LAMP).unwrap().state.rgb(),
        Some(Rgb::new(1, 2, 3))
    );
    assert_eq!(
        s.sim.frames_for(LAMP).last(),
        Some(&encode_rgb(1, 2, 3).as_bytes().to_vec())
    );
}

#[test]
fn rejects_invalid_config_text() {
    let err = Config::from_toml_str("[link]\nretry_attempts = 0\n", Path::new("bad.toml"))
        .unwrap_err();
    assert!(err.to_string().contains("retry_attempts"), "{err}");

    let err = Config::from_toml_str(
        "[viewer]\neffect_duration_secs = 1\n",
        Path::new("bad.toml"),
    )
    .unwrap_err();
    assert!(err.to_string().contains("viewer"), "{err}");
}
