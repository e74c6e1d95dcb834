// Engine scenes.
//
// A `Scene` is the unit the game's scene stack holds. It carries the
// notifications the coordination layer and applications hook into
// (`on_load`, `on_update`, `on_message`, `on_state_change`) and two mode
// flags the game consults every frame:
// - `local`: whether the scene updates between ticks (`InterpolateLocal`) or
//   only when a tick is applied (`NonLocal`);
// - `tick_generation`: whether the active instance emits a tick every frame
//   (`ByClock`) or only when someone calls `Game::raise_tick` (`Manual`).
//
// State transitions are driven by the game's scene stack (see `game.rs`).
// Each transition fires `on_state_change` exactly once.

use std::cell::Cell;
use std::rc::Rc;

use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::trigger::Trigger;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SceneState {
    /// Created, never shown.
    Standby,
    /// Top of the scene stack.
    Active,
    /// Covered by a pushed scene.
    Deactive,
    /// Being popped or replaced; destruction follows.
    BeforeDestroyed,
    Destroyed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LocalTickMode {
    #[default]
    NonLocal,
    /// Updates fire on frames without a tick as well.
    InterpolateLocal,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TickGenerationMode {
    #[default]
    ByClock,
    Manual,
}

#[derive(Clone, Debug, Default)]
pub struct SceneConfig {
    pub name: String,
    pub local: LocalTickMode,
    pub tick_generation: TickGenerationMode,
}

impl SceneConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// A message event as delivered to `Scene::on_message`.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageEvent {
    pub priority: i32,
    pub player_id: Option<String>,
    pub data: Value,
}

#[derive(Debug)]
pub struct Scene {
    name: String,
    local: LocalTickMode,
    tick_generation: TickGenerationMode,
    state: Cell<SceneState>,
    loaded: Cell<bool>,
    pub on_load: Trigger<()>,
    pub on_update: Trigger<()>,
    pub on_message: Trigger<MessageEvent>,
    pub on_state_change: Trigger<SceneState>,
}

impl Scene {
    pub fn new(config: SceneConfig) -> Rc<Self> {
        Rc::new(Self {
            name: config.name,
            local: config.local,
            tick_generation: config.tick_generation,
            state: Cell::new(SceneState::Standby),
            loaded: Cell::new(false),
            on_load: Trigger::new(),
            on_update: Trigger::new(),
            on_message: Trigger::new(),
            on_state_change: Trigger::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local(&self) -> LocalTickMode {
        self.local
    }

    pub fn tick_generation(&self) -> TickGenerationMode {
        self.tick_generation
    }

    pub fn state(&self) -> SceneState {
        self.state.get()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.get() == SceneState::Destroyed
    }

    pub(crate) fn set_state(&self, state: SceneState) {
        if self.state.replace(state) != state {
            self.on_state_change.fire(&state);
        }
    }

    /// Fire `on_load` the first time the scene becomes active.
    pub(crate) fn mark_loaded(&self) {
        if !self.loaded.replace(true) {
            self.on_load.fire(&());
        }
    }

    /// Tear the scene down: mark it destroyed and drop every handler.
    pub fn destroy(&self) -> EngineResult<()> {
        if self.is_destroyed() {
            return Err(EngineError::AlreadyDestroyed("scene"));
        }
        self.set_state(SceneState::Destroyed);
        self.on_load.destroy()?;
        self.on_update.destroy()?;
        self.on_message.destroy()?;
        self.on_state_change.destroy()?;
        Ok(())
    }
}
