// coe_engine — headless host for the engine contract that coe runs on.
//
// The coordination layer (`coe`) never owns a main loop. It plugs into an
// engine that provides scenes, event filters, ticks, join/leave
// notifications, and access to platform collaborators. This crate is that
// engine, reduced to what the coordination layer needs, and runnable without
// any rendering or network so whole plays can be driven from tests.
//
// Module overview:
// - `trigger.rs`:  `Trigger<T>`, the observer list used for every notification.
// - `timer.rs`:    `TimerManager`, timeouts/intervals in update pulses.
// - `scene.rs`:    Engine `Scene`, its state machine and tick modes.
// - `game.rs`:     `Game`, one instance: scene stack, event filters, tick
//                  production (active instance) and application (all).
// - `play.rs`:     `Play`, the roster of instances stepped in lockstep.
// - `external.rs`: `CoePlugin` / `ExternalSender` collaborator traits.
// - `error.rs`:    `EngineError`.
//
// Everything is single-threaded: shared state is `Rc` + `Cell`/`RefCell`,
// and no borrow is held while a handler runs.

pub mod error;
pub mod external;
pub mod game;
pub mod play;
pub mod scene;
pub mod timer;
pub mod trigger;

pub use error::{EngineError, EngineResult};
pub use external::{
    CoePlugin, ExitSessionParameters, External, ExternalSender, MessageHandler,
    StartSessionParameters,
};
pub use game::{
    EventFilter, FilterControl, FilterId, Game, GameConfig, JoinEvent, LeaveEvent, Tick,
};
pub use play::{InstanceId, Play};
pub use scene::{
    LocalTickMode, MessageEvent, Scene, SceneConfig, SceneState, TickGenerationMode,
};
pub use timer::{TimerId, TimerManager};
pub use trigger::{HandlerId, Trigger};
