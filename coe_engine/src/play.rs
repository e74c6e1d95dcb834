// A play: every game instance of one session, stepped in lockstep.
//
// `Play` stands in for the transport between instances. It holds the
// instance roster, forwards events raised on passive instances to the active
// instance, and hands each tick the active instance commits to every
// instance (itself included). Everything runs on the caller's thread; there
// is no internal locking and no reordering.
//
// One `step()` is one frame for every instance:
// 1. Apply queued scene changes everywhere.
// 2. Forward passive instances' raised events to the active instance.
// 3. Run the active instance's filter pass (and its clock tick, if any).
// 4. Distribute committed ticks.
// 5. Every instance applies its ticks and fires its updates.
// 6. Distribute ticks forced during step 5. They are applied next frame.
//
// Instances are iterated in `InstanceId` order, so a run is reproducible.

use std::collections::BTreeMap;
use std::rc::Rc;

use coe_messages::PlaylogEvent;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::game::Game;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u32);

#[derive(Default)]
pub struct Play {
    instances: BTreeMap<InstanceId, Rc<Game>>,
    next_instance_id: u32,
    active: Option<InstanceId>,
    frame: u64,
    ticks_distributed: u64,
}

impl Play {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an instance. A play has at most one active instance.
    pub fn add_instance(&mut self, game: Rc<Game>) -> EngineResult<InstanceId> {
        if game.is_active_instance() {
            if let Some(existing) = self.active {
                return Err(EngineError::DuplicateActiveInstance(existing.0));
            }
        }
        let id = InstanceId(self.next_instance_id);
        self.next_instance_id += 1;
        if game.is_active_instance() {
            self.active = Some(id);
        }
        debug!(instance = id.0, active = game.is_active_instance(), "instance added");
        self.instances.insert(id, game);
        Ok(id)
    }

    pub fn remove_instance(&mut self, id: InstanceId) -> Option<Rc<Game>> {
        if self.active == Some(id) {
            self.active = None;
        }
        self.instances.remove(&id)
    }

    pub fn instance(&self, id: InstanceId) -> Option<&Rc<Game>> {
        self.instances.get(&id)
    }

    pub fn active_instance(&self) -> Option<&Rc<Game>> {
        self.active.and_then(|id| self.instances.get(&id))
    }

    pub fn instances(&self) -> impl Iterator<Item = (InstanceId, &Rc<Game>)> {
        self.instances.iter().map(|(id, g)| (*id, g))
    }

    /// Frames stepped so far.
    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    /// Ticks handed out so far (counted once per tick, not per recipient).
    pub fn tick_count(&self) -> u64 {
        self.ticks_distributed
    }

    /// Announce a player joining. The event enters the active instance's
    /// next filter pass like any raised event.
    pub fn join(&self, player_id: &str, name: Option<String>) {
        self.raise_on_active(PlaylogEvent::join(player_id, name));
    }

    pub fn leave(&self, player_id: &str) {
        self.raise_on_active(PlaylogEvent::leave(player_id));
    }

    fn raise_on_active(&self, event: PlaylogEvent) {
        match self.active_instance() {
            Some(active) => active.raise_event(event),
            None => warn!(?event, "no active instance; event dropped"),
        }
    }

    /// Run one frame on every instance.
    pub fn step(&mut self) {
        for game in self.instances.values() {
            game.flush_scene_changes();
        }

        let active = self.active_instance().cloned();
        for (id, game) in &self.instances {
            if game.is_active_instance() {
                continue;
            }
            let events = game.take_outgoing_events();
            if events.is_empty() {
                continue;
            }
            match &active {
                Some(active) => active.enqueue_remote_events(events),
                None => warn!(instance = id.0, count = events.len(), "no active instance; events dropped"),
            }
        }

        if let Some(active) = &active {
            active.process_events();
        }
        self.distribute();

        for game in self.instances.values() {
            game.consume_ticks();
        }
        self.distribute();

        self.frame += 1;
    }

    pub fn advance(&mut self, frames: u64) {
        for _ in 0..frames {
            self.step();
        }
    }

    /// Step until `done` holds, checking before each frame. Returns the
    /// number of frames stepped.
    pub fn advance_until(
        &mut self,
        mut done: impl FnMut(&Play) -> bool,
        max_frames: u64,
    ) -> EngineResult<u64> {
        for stepped in 0..=max_frames {
            if done(self) {
                return Ok(stepped);
            }
            if stepped < max_frames {
                self.step();
            }
        }
        Err(EngineError::FrameLimitReached(max_frames))
    }

    fn distribute(&mut self) {
        let Some(active) = self.active_instance().cloned() else {
            return;
        };
        for tick in active.take_outgoing_ticks() {
            for game in self.instances.values() {
                game.receive_tick(tick.clone());
            }
            self.ticks_distributed += 1;
        }
    }
}
