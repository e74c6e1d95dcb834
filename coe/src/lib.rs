// coe — session coordination for multiplayer game sessions.
//
// The library sits between a tick-based engine (`coe_engine`) and an
// application written as a controller plus views. It owns the message path
// of the play: raw message events become controller `Action`s, controller
// broadcasts become the only message events views ever see, and the active
// instance decides when those broadcasts are committed as ticks.
//
// Module overview:
// - `context.rs`:        `CoeContext`: initialization, permission, roles,
//                        joined players, trusted-sender check.
// - `config.rs`:         `Permission`, launch-argument parsing.
// - `action.rs`:         `Action` / `Player`.
// - `controller.rs`:     `Controller` trait and `BaseController` (broadcast
//                        buffer, intake lock, timers, lifecycle).
// - `coe_controller.rs`: `CoeController`, session-control handling.
// - `scene.rs`:          COE `Scene`: the event filter and manual ticks.
// - `watcher.rs`:        `SceneWatcher` trait and its subscription handle.
// - `bridge.rs`:         `CoeMessageEventHandler`, commands -> platform calls.
// - `session.rs`:        Session functions on `CoeContext`.
// - `error.rs`:          `CoeError`.
//
// Typical setup, per instance:
//
//   let context = CoeContext::initialize(InitializeParameters::new(game.clone()))?;
//   let controller = CoeController::new(&context)?;
//   let scene = Scene::new(&context, controller.clone(), SceneParameters::named("main"))?;
//   game.push_scene(scene.engine_scene().clone());

pub mod action;
pub mod bridge;
pub mod coe_controller;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod scene;
pub mod session;
pub mod watcher;

pub use action::{Action, Player};
pub use bridge::CoeMessageEventHandler;
pub use coe_controller::CoeController;
pub use config::{CoeArguments, InitializeArguments, Permission};
pub use context::{BROADCASTER_ROLE, CoeContext, InitializeParameters, TRUSTED_PLAYER_ID};
pub use controller::{BaseController, BroadcastEntry, Controller, Lifecycle};
pub use error::{CoeError, CoeResult};
pub use scene::{Scene, SceneParameters};
pub use session::StartLocalSessionParameters;
pub use watcher::{SceneWatcher, SceneWatcherHandle};
