// Test harness for end-to-end coe scenarios.
//
// `TestPlay` builds a two-instance play on the headless engine: one active
// instance (no player of its own) and one passive instance whose player is
// `passive-0`. Each instance runs the fixture application (`fixture.rs`) and
// gets its own recording coe plugin and send channel, so tests can check
// what each instance reported to the platform.
//
// Everything is driven synchronously through `Play::step`; there are no
// threads or timeouts, only a frame budget.
//
// See also: `tests/run_test.rs` for the scenarios.

pub mod fixture;

use std::cell::RefCell;
use std::rc::Rc;

use coe_engine::{
    CoePlugin, ExitSessionParameters, External, ExternalSender, Game, GameConfig, Play,
    StartSessionParameters,
};
use coe_messages::{ExternalMessage, PlaylogEvent, SessionId};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

pub use fixture::FixtureApp;

pub const PLAY_ID: &str = "0";
pub const PASSIVE_PLAYER_ID: &str = "passive-0";

/// Frame budget for `advance_until`.
const MAX_FRAMES: u64 = 100;

/// Install a test-friendly subscriber once. `RUST_LOG` overrides the default
/// `warn` level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// Recording collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingPlugin {
    pub started: RefCell<Vec<StartSessionParameters>>,
    pub exited: RefCell<Vec<(SessionId, Option<ExitSessionParameters>)>>,
    pub local_events: RefCell<Vec<(SessionId, Vec<PlaylogEvent>)>>,
}

impl CoePlugin for RecordingPlugin {
    fn start_session(&self, parameters: StartSessionParameters) {
        self.started.borrow_mut().push(parameters);
    }

    fn exit_session(&self, session_id: &SessionId, parameters: Option<ExitSessionParameters>) {
        self.exited
            .borrow_mut()
            .push((session_id.clone(), parameters));
    }

    fn send_local_events(&self, session_id: &SessionId, events: Vec<PlaylogEvent>) {
        self.local_events
            .borrow_mut()
            .push((session_id.clone(), events));
    }
}

#[derive(Default)]
pub struct RecordingSender {
    pub sent: RefCell<Vec<ExternalMessage>>,
}

impl ExternalSender for RecordingSender {
    fn send(&self, message: ExternalMessage) {
        self.sent.borrow_mut().push(message);
    }
}

// ---------------------------------------------------------------------------
// Instances and the play
// ---------------------------------------------------------------------------

pub struct TestInstance {
    pub game: Rc<Game>,
    pub app: Rc<FixtureApp>,
    pub plugin: Rc<RecordingPlugin>,
    pub sender: Rc<RecordingSender>,
}

impl TestInstance {
    fn launch(active: bool, self_id: Option<&str>) -> Self {
        let plugin = Rc::new(RecordingPlugin::default());
        let sender = Rc::new(RecordingSender::default());
        let game = Game::new(
            GameConfig {
                play_id: PLAY_ID.into(),
                self_id: self_id.map(str::to_owned),
                active,
                ..GameConfig::default()
            },
            External {
                coe: Some(plugin.clone()),
                send: Some(sender.clone()),
            },
        );
        let app = FixtureApp::main(&game).expect("fixture main failed");
        Self {
            game,
            app,
            plugin,
            sender,
        }
    }

    pub fn snapshots(&self) -> Vec<Value> {
        self.app.snapshots()
    }

    pub fn scene_name(&self) -> Option<String> {
        self.game.scene().map(|s| s.name().to_owned())
    }

    /// Serialized start parameters, in call order.
    pub fn started_sessions(&self) -> Vec<Value> {
        self.plugin
            .started
            .borrow()
            .iter()
            .map(|p| serde_json::to_value(p).expect("serialize start parameters failed"))
            .collect()
    }

    pub fn sent_messages(&self) -> Vec<Value> {
        self.sender
            .sent
            .borrow()
            .iter()
            .map(|m| serde_json::to_value(m).expect("serialize external message failed"))
            .collect()
    }
}

pub struct TestPlay {
    pub play: Play,
    pub active: TestInstance,
    pub passive: TestInstance,
}

impl Default for TestPlay {
    fn default() -> Self {
        Self::new()
    }
}

impl TestPlay {
    pub fn new() -> Self {
        init_tracing();
        let active = TestInstance::launch(true, None);
        let passive = TestInstance::launch(false, Some(PASSIVE_PLAYER_ID));
        let mut play = Play::new();
        play.add_instance(active.game.clone())
            .expect("add active instance failed");
        play.add_instance(passive.game.clone())
            .expect("add passive instance failed");
        Self {
            play,
            active,
            passive,
        }
    }

    /// Raise a message event on the active instance, as the platform would
    /// on behalf of `player_id`.
    pub fn send_message(&self, data: Value, player_id: Option<&str>) {
        self.active
            .game
            .raise_event(PlaylogEvent::message(0, player_id.map(str::to_owned), data));
    }

    pub fn send_join_event(&self, player_id: &str, name: &str) {
        self.play.join(player_id, Some(name.to_owned()));
    }

    pub fn send_leave_event(&self, player_id: &str) {
        self.play.leave(player_id);
    }

    pub fn advance(&mut self, frames: u64) {
        self.play.advance(frames);
    }

    /// Step until `done` holds. Panics when the frame budget runs out.
    pub fn advance_until(&mut self, done: impl Fn(&TestPlay) -> bool) {
        for _ in 0..MAX_FRAMES {
            if done(self) {
                return;
            }
            self.play.step();
        }
        assert!(done(self), "condition not reached within {MAX_FRAMES} frames");
    }
}
