// The fixture application driven by the end-to-end tests.
//
// A small coe application written the way a real one would be: one
// controller, scenes named `test-scene-N`, and a snapshot log recording
// everything the application observes. The log is what the tests assert on.
//
// Controller behaviour (actions):
// - `{"name": "broadcast", "parameter": X}`     -> broadcast X to every view
// - `{"name": "broadcast-end", "parameter": R}` -> `broadcast_end(R)`
//
// Scene behaviour (commands):
// - `next-scene`          -> push a freshly created scene
// - `is-joined-player`    -> snapshot whether `playerId` has joined
// - `start-session`       -> `start_session(parameter)`
// - `start-local-session` -> `start_local_session(parameter)`
// - `exit-session`        -> `exit_session(parameter.sessionId, parameter.parameter)`

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use coe::{
    Action, CoeContext, CoeController, CoeResult, Controller, InitializeParameters, Scene,
    SceneParameters, StartLocalSessionParameters,
};
use coe_engine::{ExitSessionParameters, Game, StartSessionParameters};
use coe_messages::{CoeMessage, SessionId, SessionStartMessage};
use serde_json::{Value, json};
use tracing::warn;

pub struct FixtureApp {
    context: Rc<CoeContext>,
    controller: Rc<CoeController>,
    snapshots: RefCell<Vec<Value>>,
    scenes_created: Cell<u32>,
    last_scene: RefCell<Weak<Scene>>,
    weak_self: Weak<FixtureApp>,
}

impl FixtureApp {
    /// Entry point, run once per instance: initialize coe, build the
    /// controller, push the first scene.
    pub fn main(game: &Rc<Game>) -> CoeResult<Rc<Self>> {
        let context = CoeContext::initialize(InitializeParameters::new(game.clone()))?;
        let controller = CoeController::new(&context)?;
        let app = Rc::new_cyclic(|weak_self| Self {
            context,
            controller,
            snapshots: RefCell::new(Vec::new()),
            scenes_created: Cell::new(0),
            last_scene: RefCell::new(Weak::new()),
            weak_self: weak_self.clone(),
        });
        app.stack_snapshot(json!({
            "name": "initialize",
            "parameter": {
                "permission": app.context.permission(),
                "isSandbox": app.context.is_sandbox(),
            }
        }));

        let weak = app.weak_self.clone();
        app.controller
            .on_start_session_request
            .add(move |message: &SessionStartMessage| {
                if let Some(app) = weak.upgrade() {
                    app.stack_snapshot(json!({
                        "name": "start-session",
                        "parameter": CoeMessage::Start(message.clone()),
                    }));
                }
            })?;
        let weak = app.weak_self.clone();
        app.controller
            .base()
            .on_action_receive
            .add(move |action: &Action| {
                if let Some(app) = weak.upgrade() {
                    app.handle_action(action);
                }
            })?;

        let scene = app.create_scene()?;
        game.push_scene(scene.engine_scene().clone());
        Ok(app)
    }

    pub fn context(&self) -> &Rc<CoeContext> {
        &self.context
    }

    pub fn controller(&self) -> &Rc<CoeController> {
        &self.controller
    }

    /// The most recently created scene, while it is alive.
    pub fn scene(&self) -> Option<Rc<Scene>> {
        self.last_scene.borrow().upgrade()
    }

    pub fn snapshots(&self) -> Vec<Value> {
        self.snapshots.borrow().clone()
    }

    fn stack_snapshot(&self, snapshot: Value) {
        self.snapshots.borrow_mut().push(snapshot);
    }

    fn handle_action(&self, action: &Action) {
        self.stack_snapshot(json!({"name": "action-received", "parameter": action}));
        let parameter = action.data.get("parameter").cloned().unwrap_or(Value::Null);
        let result = match action.data.get("name").and_then(Value::as_str) {
            Some("broadcast") => self.controller.base().broadcast(&parameter, 0),
            Some("broadcast-end") => self.controller.broadcast_end(Some(parameter)),
            _ => Ok(()),
        };
        if let Err(err) = result {
            warn!(%err, "fixture action failed");
        }
    }

    fn create_scene(&self) -> CoeResult<Rc<Scene>> {
        let index = self.scenes_created.get();
        self.scenes_created.set(index + 1);
        let scene = Scene::new(
            &self.context,
            self.controller.clone(),
            SceneParameters::named(format!("test-scene-{index}")),
        )?;
        let weak_app = self.weak_self.clone();
        let weak_scene = Rc::downgrade(&scene);
        scene.on_command_receive.add(move |command: &Value| {
            if let (Some(app), Some(scene)) = (weak_app.upgrade(), weak_scene.upgrade()) {
                if let Err(err) = app.handle_command(&scene, command) {
                    warn!(%err, "fixture command failed");
                }
            }
        })?;
        *self.last_scene.borrow_mut() = Rc::downgrade(&scene);
        Ok(scene)
    }

    fn handle_command(&self, scene: &Scene, command: &Value) -> CoeResult<()> {
        self.stack_snapshot(json!({
            "name": "command-received",
            "sceneName": scene.name(),
            "parameter": command,
        }));
        let parameter = command.get("parameter").cloned().unwrap_or(Value::Null);
        match command.get("name").and_then(Value::as_str) {
            Some("next-scene") => {
                let next = self.create_scene()?;
                self.context.game().push_scene(next.engine_scene().clone());
            }
            Some("is-joined-player") => {
                let player_id = command.get("playerId").and_then(Value::as_str).unwrap_or("");
                self.stack_snapshot(json!({
                    "name": "joined-players",
                    "parameter": {"isJoinedPlayer": self.context.is_joined_player(player_id)},
                }));
            }
            Some("start-session") => {
                let params: StartSessionParameters = serde_json::from_value(parameter)?;
                self.context.start_session(params);
            }
            Some("start-local-session") => {
                let params: StartLocalSessionParameters = serde_json::from_value(parameter)?;
                self.context.start_local_session(params)?;
            }
            Some("exit-session") => {
                let session_id: SessionId = serde_json::from_value(parameter["sessionId"].clone())?;
                let params: Option<ExitSessionParameters> =
                    serde_json::from_value(parameter["parameter"].clone())?;
                self.context.exit_session(&session_id, params);
            }
            _ => {}
        }
        Ok(())
    }
}
