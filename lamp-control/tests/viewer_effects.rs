//! Viewer effect orchestration: cooldowns, snapshot chains and timed restore

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lamp_control::cooldown::CooldownKind;
use lamp_control::lamp_transport::{
    encode_effect, encode_rgb, ConnectionManager, RetryPolicy, SimLink,
};
use lamp_control::{
    ChatAdapter, ChatError, DeviceRegistry, Hub, HubConfig, Outcome, Privileges, Rgb, Selection,
    ViewerConfig, ViewerEffects, ViewerRequest,
};
use parking_lot::Mutex;
use tokio::time::{sleep, timeout};

const LAMP: &str = "BE:EF:00:00:00:01";
const START: Rgb = Rgb::new(10, 20, 30);

#[derive(Default)]
struct RecordingChat {
    replies: Mutex<Vec<String>>,
}

impl RecordingChat {
    fn last(&self) -> Option<String> {
        self.replies.lock().last().cloned()
    }

    fn count(&self) -> usize {
        self.replies.lock().len()
    }
}

#[async_trait]
impl ChatAdapter for RecordingChat {
    async fn send_reply(&self, text: &str) -> Result<(), ChatError> {
        self.replies.lock().push(text.to_string());
        Ok(())
    }
}

struct Fixture {
    sim: Arc<SimLink>,
    registry: Arc<DeviceRegistry>,
    selection: Arc<Selection>,
    chat: Arc<RecordingChat>,
    viewer: Arc<ViewerEffects>,
}

impl Fixture {
    fn rgb(&self) -> Option<Rgb> {
        self.registry.get(LAMP).unwrap().state.rgb()
    }
}

fn enabled() -> ViewerConfig {
    ViewerConfig {
        enabled: true,
        ..ViewerConfig::default()
    }
}

async fn fixture(config: ViewerConfig) -> Fixture {
    let sim = Arc::new(SimLink::new().with_lamp(LAMP, "ELK-BLEDOM", -50));
    let link = Arc::new(ConnectionManager::new(sim.clone(), RetryPolicy::default()));
    let registry = Arc::new(DeviceRegistry::new(link));
    registry.track(LAMP, "ELK-BLEDOM");
    registry.set_color(LAMP, START).await.unwrap();

    let selection = Arc::new(Selection::new(registry.clone()));
    selection.select(LAMP).unwrap();

    let chat = Arc::new(RecordingChat::default());
    let viewer = Arc::new(ViewerEffects::new(
        registry.clone(),
        selection.clone(),
        chat.clone(),
        config,
    ));
    Fixture {
        sim,
        registry,
        selection,
        chat,
        viewer,
    }
}

fn request(user: &str, command: &str) -> ViewerRequest {
    ViewerRequest::new(user, command)
}

fn moderator(user: &str, command: &str) -> ViewerRequest {
    request(user, command).with_privileges(Privileges {
        moderator: true,
        ..Privileges::default()
    })
}

#[tokio::test(start_paused = true)]
async fn chained_overrides_restore_the_first_snapshot() {
    let f = fixture(enabled()).await;
    f.viewer.start().await.unwrap();

    let outcome = f.viewer.handle(&request("alice", "red")).await;
    assert!(matches!(outcome, Outcome::Applied { .. }));
    assert_eq!(f.rgb(), Some(Rgb::new(255, 0, 0)));
    assert_eq!(
        f.chat.last().unwrap(),
        "@alice Lamp set to red for 30 seconds!"
    );

    sleep(Duration::from_secs(10)).await;
    let outcome = f.viewer.handle(&request("bob", "blue")).await;
    assert!(matches!(outcome, Outcome::Applied { .. }));
    assert_eq!(f.rgb(), Some(Rgb::new(0, 0, 255)));

    let snapshot = f.viewer.snapshots().latest(LAMP).unwrap();
    assert_eq!(snapshot.state.rgb(), Some(START));

    // alice's revert would have fired at 30s; it was cancelled
    sleep(Duration::from_secs(25)).await;
    assert_eq!(f.rgb(), Some(Rgb::new(0, 0, 255)));
    let active = f.viewer.active_effect().await.unwrap();
    assert_eq!(active.requester, "bob");
    assert_eq!(active.command, "blue");
    assert_eq!(active.remaining, Duration::from_secs(5));

    sleep(Duration::from_secs(6)).await;
    assert_eq!(f.rgb(), Some(START));
    assert!(f.viewer.active_effect().await.is_none());
    let frames = f.sim.frames_for(LAMP);
    assert_eq!(frames.last().unwrap(), &encode_rgb(10, 20, 30).as_bytes().to_vec());
    // The chain is over, the next override snapshots afresh
    assert!(f.viewer.snapshots().latest(LAMP).is_none());
}

#[tokio::test(start_paused = true)]
async fn status_reads_do_not_wait_for_a_slow_write() {
    let f = fixture(enabled()).await;
    f.viewer.start().await.unwrap();
    f.viewer.handle(&request("alice", "red")).await;

    f.sim.delay_next_writes(1, Duration::from_secs(3));
    let viewer = f.viewer.clone();
    let bob = tokio::spawn(async move { viewer.handle(&moderator("bob", "blue")).await });
    sleep(Duration::from_secs(1)).await;

    let active = timeout(Duration::from_millis(10), f.viewer.active_effect())
        .await
        .expect("active_effect blocked behind the lamp write")
        .unwrap();
    assert_eq!(active.requester, "alice");
    timeout(Duration::from_millis(10), f.viewer.status())
        .await
        .expect("status blocked behind the lamp write");

    assert!(matches!(bob.await.unwrap(), Outcome::Applied { .. }));
    assert_eq!(f.rgb(), Some(Rgb::new(0, 0, 255)));
    assert_eq!(f.viewer.active_effect().await.unwrap().requester, "bob");
}

#[tokio::test(start_paused = true)]
async fn revert_due_during_an_override_write_is_superseded() {
    let f = fixture(enabled()).await;
    f.viewer.start().await.unwrap();
    f.viewer.handle(&request("alice", "red")).await;

    // bob's write is still in flight when alice's revert comes due at 30s
    sleep(Duration::from_secs(29)).await;
    f.sim.delay_next_writes(1, Duration::from_secs(3));
    let outcome = f.viewer.handle(&moderator("bob", "blue")).await;
    assert!(matches!(outcome, Outcome::Applied { .. }));

    sleep(Duration::from_secs(1)).await;
    assert_eq!(f.rgb(), Some(Rgb::new(0, 0, 255)));
    assert_eq!(f.viewer.active_effect().await.unwrap().requester, "bob");

    sleep(Duration::from_secs(30)).await;
    assert_eq!(f.rgb(), Some(START));
}

#[tokio::test(start_paused = true)]
async fn cooldown_rejections_reply_and_leave_state_alone() {
    let f = fixture(enabled()).await;
    f.viewer.start().await.unwrap();

    f.viewer.handle(&request("alice", "red")).await;
    let writes = f.sim.frames_for(LAMP).len();

    sleep(Duration::from_secs(2)).await;
    match f.viewer.handle(&request("bob", "green")).await {
        Outcome::CoolingDown(rejection) => {
            assert_eq!(rejection.kind, CooldownKind::Global);
            assert_eq!(rejection.remaining, Duration::from_secs(3));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(
        f.chat.last().unwrap(),
        "@bob Please wait 3 seconds (global cooldown)"
    );

    sleep(Duration::from_secs(4)).await;
    match f.viewer.handle(&request("alice", "blue")).await {
        Outcome::CoolingDown(rejection) => {
            assert_eq!(rejection.kind, CooldownKind::Personal);
            assert_eq!(rejection.remaining, Duration::from_secs(24));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(
        f.chat.last().unwrap(),
        "@alice Please wait 24 seconds (personal cooldown)"
    );

    assert_eq!(f.rgb(), Some(Rgb::new(255, 0, 0)));
    assert_eq!(f.sim.frames_for(LAMP).len(), writes);

    // Rejections did not move the clocks
    let outcome = f.viewer.handle(&request("bob", "green")).await;
    assert!(matches!(outcome, Outcome::Applied { .. }));
}

#[tokio::test(start_paused = true)]
async fn privileged_viewers_bypass_cooldowns() {
    let f = fixture(enabled()).await;
    f.viewer.start().await.unwrap();
    f.viewer.handle(&request("alice", "red")).await;

    let outcome = f.viewer.handle(&moderator("mod", "green")).await;
    assert!(matches!(outcome, Outcome::Applied { .. }));
    assert_eq!(f.rgb(), Some(Rgb::new(0, 255, 0)));
}

#[tokio::test(start_paused = true)]
async fn effects_use_the_configured_speed() {
    let f = fixture(ViewerConfig {
        effect_speed: 200,
        ..enabled()
    })
    .await;
    f.viewer.start().await.unwrap();

    f.viewer.handle(&request("alice", "Rainbow")).await;
    let state = f.registry.get(LAMP).unwrap().state;
    assert_eq!(state.effect(), Some((0x25, 200)));
    assert_eq!(state.rgb(), None);
    assert_eq!(
        f.sim.frames_for(LAMP).last().unwrap(),
        &encode_effect(0x25, 200).as_bytes().to_vec()
    );

    sleep(Duration::from_secs(31)).await;
    assert_eq!(f.rgb(), Some(START));
}

#[tokio::test(start_paused = true)]
async fn unknown_commands_do_not_consume_cooldown() {
    let f = fixture(enabled()).await;
    f.viewer.start().await.unwrap();

    let outcome = f.viewer.handle(&request("alice", "teal")).await;
    assert_eq!(outcome, Outcome::UnknownCommand("teal".into()));
    assert_eq!(f.chat.last().unwrap(), "@alice Unknown lamp command: teal");

    let outcome = f.viewer.handle(&request("alice", "red")).await;
    assert!(matches!(outcome, Outcome::Applied { .. }));
}

#[tokio::test(start_paused = true)]
async fn failed_override_keeps_the_running_chain() {
    let f = fixture(enabled()).await;
    f.viewer.start().await.unwrap();
    f.viewer.handle(&request("alice", "red")).await;

    sleep(Duration::from_secs(6)).await;
    f.sim.fail_next_writes(3);
    let outcome = f.viewer.handle(&request("bob", "blue")).await;
    assert!(matches!(outcome, Outcome::Failed(_)));
    assert!(f
        .chat
        .last()
        .unwrap()
        .starts_with("@bob Sorry, that command failed:"));
    assert_eq!(f.rgb(), Some(Rgb::new(255, 0, 0)));
    assert_eq!(f.viewer.active_effect().await.unwrap().requester, "alice");

    // The failure did not start bob's cooldown
    let outcome = f.viewer.handle(&request("bob", "green")).await;
    assert!(matches!(outcome, Outcome::Applied { .. }));

    sleep(Duration::from_secs(31)).await;
    assert_eq!(f.rgb(), Some(START));
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_revert_without_restoring() {
    let f = fixture(enabled()).await;
    f.viewer.start().await.unwrap();
    f.viewer.handle(&request("alice", "red")).await;

    f.viewer.stop().await;
    assert!(!f.viewer.is_running());
    assert!(f.viewer.active_effect().await.is_none());
    assert!(f.viewer.snapshots().latest(LAMP).is_none());

    sleep(Duration::from_secs(60)).await;
    assert_eq!(f.rgb(), Some(Rgb::new(255, 0, 0)));

    let replies = f.chat.count();
    assert_eq!(
        f.viewer.handle(&request("bob", "blue")).await,
        Outcome::Disabled
    );
    assert_eq!(f.chat.count(), replies);
}

#[tokio::test(start_paused = true)]
async fn restart_clears_cooldowns() {
    let f = fixture(enabled()).await;
    f.viewer.start().await.unwrap();
    f.viewer.handle(&request("alice", "red")).await;
    assert!(matches!(
        f.viewer.handle(&request("alice", "green")).await,
        Outcome::CoolingDown(_)
    ));

    f.viewer.stop().await;
    f.viewer.start().await.unwrap();
    let outcome = f.viewer.handle(&request("alice", "green")).await;
    assert!(matches!(outcome, Outcome::Applied { .. }), "{outcome:?}");
}

#[tokio::test]
async fn start_requires_enabled_and_valid_config() {
    let f = fixture(ViewerConfig::default()).await;
    assert!(f.viewer.start().await.is_err());

    assert!(f
        .viewer
        .update_config(ViewerConfig {
            effect_duration_secs: 4,
            ..enabled()
        })
        .is_err());

    f.viewer.update_config(enabled()).unwrap();
    f.viewer.start().await.unwrap();
    assert!(f.viewer.is_running());
    assert_eq!(f.viewer.catalog().len(), 14);
}

#[tokio::test(start_paused = true)]
async fn no_selection_fails_without_snapshot() {
    let f = fixture(enabled()).await;
    f.viewer.start().await.unwrap();
    f.selection.clear();

    let outcome = f.viewer.handle(&request("alice", "red")).await;
    assert_eq!(outcome, Outcome::Failed("No device selected".into()));
    assert!(f.viewer.snapshots().latest(LAMP).is_none());
}

#[tokio::test(start_paused = true)]
async fn accepted_commands_are_published_through_the_hub() {
    let sim = Arc::new(SimLink::new().with_lamp(LAMP, "ELK-BLEDOM", -50));
    let link = Arc::new(ConnectionManager::new(sim, RetryPolicy::default()));
    let registry = Arc::new(DeviceRegistry::new(link));
    registry.track(LAMP, "ELK-BLEDOM");
    let selection = Arc::new(Selection::new(registry.clone()));
    selection.select(LAMP).unwrap();
    let (hub, _task) = Hub::spawn(registry.clone(), selection.clone(), HubConfig::default());

    let viewer = Arc::new(
        ViewerEffects::new(
            registry,
            selection,
            Arc::new(RecordingChat::default()),
            enabled(),
        )
        .with_hub(hub.clone()),
    );
    viewer.start().await.unwrap();
    let mut observer = hub.register_client().await.unwrap();

    viewer.handle(&request("alice", "purple")).await;

    let update: serde_json::Value =
        serde_json::from_str(&observer.recv().await.unwrap()).unwrap();
    assert_eq!(update["type"], "state_update");
    assert_eq!(update["device"]["state"]["rgb"]["r"], 128);
    let command: serde_json::Value =
        serde_json::from_str(&observer.recv().await.unwrap()).unwrap();
    assert_eq!(command["type"], "viewer_command");
    assert_eq!(command["requester"], "alice");
    assert_eq!(command["command"], "purple");
}
