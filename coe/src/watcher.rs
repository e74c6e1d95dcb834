// Scene-change observation.
//
// A `SceneWatcher` gets a callback for every scene that becomes active.
// `SceneWatcherHandle` owns the subscription to the game's scene-changed
// notification; dropping the handle does not unsubscribe, `detach` does.

use std::cell::Cell;
use std::rc::{Rc, Weak};

use coe_engine::{Game, HandlerId, Scene};

use crate::error::CoeResult;

pub trait SceneWatcher {
    /// Called each time `scene` becomes the active scene.
    fn handle_scene(&self, scene: &Rc<Scene>);
}

pub struct SceneWatcherHandle {
    game: Weak<Game>,
    handler: Cell<Option<HandlerId>>,
}

impl SceneWatcherHandle {
    pub fn attach(game: &Rc<Game>, watcher: Rc<dyn SceneWatcher>) -> CoeResult<Self> {
        let handler = game
            .on_scene_change
            .add(move |scene: &Rc<Scene>| watcher.handle_scene(scene))?;
        Ok(Self {
            game: Rc::downgrade(game),
            handler: Cell::new(Some(handler)),
        })
    }

    pub fn is_attached(&self) -> bool {
        self.handler.get().is_some()
    }

    /// Unsubscribe. Returns false if already detached.
    pub fn detach(&self) -> bool {
        match (self.handler.take(), self.game.upgrade()) {
            (Some(id), Some(game)) => game.on_scene_change.remove(id),
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}
