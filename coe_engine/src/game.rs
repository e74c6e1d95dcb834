// A single game instance in a play.
//
// Every participant of a play runs its own `Game`. Exactly one of them, the
// **active instance**, decides the authoritative event order. The others are
// **passive**: whatever they raise is forwarded to the active instance, and
// they only ever apply ticks the active instance produced.
//
// Event flow on the active instance, one frame at a time:
//
//   raise_event ──> pending ──> filter pass ──> tick buffer ──> tick
//                      ^              │
//                      └─ deferred <──┘ (FilterControl::process_next)
//
// - The filter pass runs every registered event filter, in registration
//   order, over the pending events. A filter registered with `handle_empty`
//   runs even when there is nothing pending.
// - In `ByClock` mode a tick is produced every frame from the tick buffer.
//   In `Manual` mode the buffer only leaves when `raise_tick` is called, and
//   the forced events follow the buffered ones in that tick.
//
// Every instance (active included) applies incoming ticks in `consume_ticks`:
// join/leave events fire `on_join`/`on_leave`, message events go to the
// current scene's `on_message`, then the scene's `on_update` fires once per
// tick. Scene changes requested while a tick is being applied take effect
// after it, so one tick never straddles two scenes.
//
// Routing between instances is the `Play`'s job (see `play.rs`); a `Game`
// only fills its outboxes and drains its inboxes.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;

use coe_messages::PlaylogEvent;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{EngineError, EngineResult};
use crate::external::External;
use crate::scene::{LocalTickMode, MessageEvent, Scene, SceneState, TickGenerationMode};
use crate::trigger::Trigger;

// ---------------------------------------------------------------------------
// Configuration and event payloads
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct GameConfig {
    pub play_id: String,
    /// Player id of whoever runs this instance. Active instances usually
    /// have none.
    pub self_id: Option<String>,
    pub active: bool,
    pub fps: u32,
    /// Launch arguments handed to the application's entry point.
    pub args: Option<Value>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            play_id: "0".into(),
            self_id: None,
            active: true,
            fps: 30,
            args: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinEvent {
    pub player_id: String,
    pub name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaveEvent {
    pub player_id: String,
}

/// A batch of events the active instance committed, applied identically by
/// every instance.
#[derive(Clone, Debug, PartialEq)]
pub struct Tick {
    pub age: u64,
    pub events: Vec<PlaylogEvent>,
}

// ---------------------------------------------------------------------------
// Event filters
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterId(u64);

pub type EventFilter = Rc<dyn Fn(Vec<PlaylogEvent>, &FilterControl) -> Vec<PlaylogEvent>>;

/// Passed to every filter invocation. Events handed to `process_next` are
/// held back and lead the next filter pass.
#[derive(Debug, Default)]
pub struct FilterControl {
    deferred: RefCell<Vec<PlaylogEvent>>,
}

impl FilterControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_next(&self, event: PlaylogEvent) {
        self.deferred.borrow_mut().push(event);
    }

    pub fn take_deferred(&self) -> Vec<PlaylogEvent> {
        std::mem::take(&mut *self.deferred.borrow_mut())
    }
}

struct FilterEntry {
    id: FilterId,
    handle_empty: bool,
    filter: EventFilter,
}

enum SceneRequest {
    Push(Rc<Scene>),
    Replace(Rc<Scene>),
    Pop,
}

// ---------------------------------------------------------------------------
// Game
// ---------------------------------------------------------------------------

pub struct Game {
    play_id: String,
    self_id: Option<String>,
    active: bool,
    fps: u32,
    args: Option<Value>,
    external: External,
    clock_ms: Cell<f64>,
    next_tick_age: Cell<u64>,
    consumed_ticks: Cell<u64>,
    last_timestamp: Cell<Option<u64>>,
    plugins: RefCell<BTreeSet<&'static str>>,

    scenes: RefCell<Vec<Rc<Scene>>>,
    scene_requests: RefCell<VecDeque<SceneRequest>>,

    filters: RefCell<Vec<FilterEntry>>,
    next_filter_id: Cell<u64>,

    pending_events: RefCell<Vec<PlaylogEvent>>,
    deferred_events: RefCell<Vec<PlaylogEvent>>,
    tick_buffer: RefCell<Vec<PlaylogEvent>>,
    outgoing_events: RefCell<Vec<PlaylogEvent>>,
    outgoing_ticks: RefCell<Vec<Tick>>,
    incoming_ticks: RefCell<VecDeque<Tick>>,

    pub on_join: Trigger<JoinEvent>,
    pub on_leave: Trigger<LeaveEvent>,
    pub on_scene_change: Trigger<Rc<Scene>>,
}

impl Game {
    pub fn new(config: GameConfig, external: External) -> Rc<Self> {
        Rc::new(Self {
            play_id: config.play_id,
            self_id: config.self_id,
            active: config.active,
            fps: config.fps.max(1),
            args: config.args,
            external,
            clock_ms: Cell::new(0.0),
            next_tick_age: Cell::new(0),
            consumed_ticks: Cell::new(0),
            last_timestamp: Cell::new(None),
            plugins: RefCell::new(BTreeSet::new()),
            scenes: RefCell::new(Vec::new()),
            scene_requests: RefCell::new(VecDeque::new()),
            filters: RefCell::new(Vec::new()),
            next_filter_id: Cell::new(0),
            pending_events: RefCell::new(Vec::new()),
            deferred_events: RefCell::new(Vec::new()),
            tick_buffer: RefCell::new(Vec::new()),
            outgoing_events: RefCell::new(Vec::new()),
            outgoing_ticks: RefCell::new(Vec::new()),
            incoming_ticks: RefCell::new(VecDeque::new()),
            on_join: Trigger::new(),
            on_leave: Trigger::new(),
            on_scene_change: Trigger::new(),
        })
    }

    pub fn play_id(&self) -> &str {
        &self.play_id
    }

    pub fn self_id(&self) -> Option<&str> {
        self.self_id.as_deref()
    }

    pub fn is_active_instance(&self) -> bool {
        self.active
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn args(&self) -> Option<&Value> {
        self.args.as_ref()
    }

    pub fn external(&self) -> &External {
        &self.external
    }

    /// Game time in milliseconds. Advances by `1000 / fps` per frame.
    pub fn current_time(&self) -> f64 {
        self.clock_ms.get()
    }

    /// Number of ticks this instance has applied.
    pub fn age(&self) -> u64 {
        self.consumed_ticks.get()
    }

    /// The most recent timestamp event this instance applied.
    pub fn last_timestamp(&self) -> Option<u64> {
        self.last_timestamp.get()
    }

    /// Record that the plugin `name` attached to this game. Returns false if
    /// it already had.
    pub fn register_plugin(&self, name: &'static str) -> bool {
        self.plugins.borrow_mut().insert(name)
    }

    // -----------------------------------------------------------------------
    // Scene stack
    // -----------------------------------------------------------------------

    /// The scene on top of the stack.
    pub fn scene(&self) -> Option<Rc<Scene>> {
        self.scenes.borrow().last().cloned()
    }

    pub fn scene_count(&self) -> usize {
        self.scenes.borrow().len()
    }

    /// Request `scene` on top of the stack. Takes effect at the next flush.
    pub fn push_scene(&self, scene: Rc<Scene>) {
        self.scene_requests
            .borrow_mut()
            .push_back(SceneRequest::Push(scene));
    }

    /// Request the current scene be destroyed and `scene` take its place.
    pub fn replace_scene(&self, scene: Rc<Scene>) {
        self.scene_requests
            .borrow_mut()
            .push_back(SceneRequest::Replace(scene));
    }

    /// Request the current scene be destroyed.
    pub fn pop_scene(&self) {
        self.scene_requests.borrow_mut().push_back(SceneRequest::Pop);
    }

    /// Apply all queued scene changes, in request order.
    pub fn flush_scene_changes(&self) {
        loop {
            let request = self.scene_requests.borrow_mut().pop_front();
            let Some(request) = request else {
                break;
            };
            match request {
                SceneRequest::Push(scene) => {
                    if let Some(current) = self.scene() {
                        current.set_state(SceneState::Deactive);
                    }
                    self.scenes.borrow_mut().push(scene.clone());
                    self.activate(&scene);
                }
                SceneRequest::Replace(scene) => {
                    self.drop_top_scene();
                    self.scenes.borrow_mut().push(scene.clone());
                    self.activate(&scene);
                }
                SceneRequest::Pop => {
                    self.drop_top_scene();
                    if let Some(previous) = self.scene() {
                        self.activate(&previous);
                    }
                }
            }
        }
    }

    fn activate(&self, scene: &Rc<Scene>) {
        debug!(play_id = %self.play_id, scene = scene.name(), "scene activated");
        scene.set_state(SceneState::Active);
        scene.mark_loaded();
        self.on_scene_change.fire(scene);
    }

    fn drop_top_scene(&self) {
        let old = self.scenes.borrow_mut().pop();
        if let Some(old) = old {
            old.set_state(SceneState::BeforeDestroyed);
            if let Err(err) = old.destroy() {
                debug!(scene = old.name(), %err, "scene already torn down");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Event filters
    // -----------------------------------------------------------------------

    /// Register a filter over raised events. Filters run on the active
    /// instance only.
    pub fn add_event_filter(
        &self,
        filter: impl Fn(Vec<PlaylogEvent>, &FilterControl) -> Vec<PlaylogEvent> + 'static,
        handle_empty: bool,
    ) -> FilterId {
        let id = FilterId(self.next_filter_id.get());
        self.next_filter_id.set(self.next_filter_id.get() + 1);
        self.filters.borrow_mut().push(FilterEntry {
            id,
            handle_empty,
            filter: Rc::new(filter),
        });
        id
    }

    pub fn remove_event_filter(&self, id: FilterId) -> bool {
        let mut filters = self.filters.borrow_mut();
        let before = filters.len();
        filters.retain(|f| f.id != id);
        filters.len() != before
    }

    pub fn event_filter_count(&self) -> usize {
        self.filters.borrow().len()
    }

    // -----------------------------------------------------------------------
    // Raising events and ticks
    // -----------------------------------------------------------------------

    /// Submit an event. On a passive instance it is forwarded to the active
    /// instance; on the active instance it waits for the next filter pass.
    pub fn raise_event(&self, event: PlaylogEvent) {
        if self.active {
            self.pending_events.borrow_mut().push(event);
        } else {
            self.outgoing_events.borrow_mut().push(event);
        }
    }

    /// Commit a tick now: everything in the tick buffer followed by
    /// `events`.
    pub fn raise_tick(&self, events: Vec<PlaylogEvent>) -> EngineResult<()> {
        if !self.active {
            return Err(EngineError::NotActiveInstance);
        }
        self.emit_tick(events);
        Ok(())
    }

    /// Events forwarded from other instances, queued behind local ones.
    pub fn enqueue_remote_events(&self, events: Vec<PlaylogEvent>) {
        self.pending_events.borrow_mut().extend(events);
    }

    /// Run the filter pass and, in `ByClock` mode, commit a tick.
    pub fn process_events(&self) {
        if !self.active {
            return;
        }
        let mut events = std::mem::take(&mut *self.deferred_events.borrow_mut());
        events.append(&mut self.pending_events.borrow_mut());

        let filters: Vec<(bool, EventFilter)> = self
            .filters
            .borrow()
            .iter()
            .map(|f| (f.handle_empty, f.filter.clone()))
            .collect();
        for (handle_empty, filter) in filters {
            if events.is_empty() && !handle_empty {
                continue;
            }
            let control = FilterControl::new();
            events = filter(events, &control);
            self.deferred_events
                .borrow_mut()
                .extend(control.take_deferred());
        }
        self.tick_buffer.borrow_mut().extend(events);

        let by_clock = self
            .scene()
            .is_none_or(|s| s.tick_generation() == TickGenerationMode::ByClock);
        if by_clock {
            self.emit_tick(Vec::new());
        }
    }

    fn emit_tick(&self, forced: Vec<PlaylogEvent>) {
        let mut events = std::mem::take(&mut *self.tick_buffer.borrow_mut());
        events.extend(forced);
        let age = self.next_tick_age.get();
        self.next_tick_age.set(age + 1);
        if !events.is_empty() {
            debug!(play_id = %self.play_id, age, events = events.len(), "tick committed");
        }
        self.outgoing_ticks.borrow_mut().push(Tick { age, events });
    }

    pub fn take_outgoing_events(&self) -> Vec<PlaylogEvent> {
        std::mem::take(&mut *self.outgoing_events.borrow_mut())
    }

    pub fn take_outgoing_ticks(&self) -> Vec<Tick> {
        std::mem::take(&mut *self.outgoing_ticks.borrow_mut())
    }

    pub fn receive_tick(&self, tick: Tick) {
        self.incoming_ticks.borrow_mut().push_back(tick);
    }

    // -----------------------------------------------------------------------
    // Applying ticks
    // -----------------------------------------------------------------------

    /// Apply every received tick, then advance the clock by one frame. A
    /// frame without ticks still updates an `InterpolateLocal` scene.
    pub fn consume_ticks(&self) {
        let mut consumed = false;
        loop {
            let tick = self.incoming_ticks.borrow_mut().pop_front();
            let Some(tick) = tick else {
                break;
            };
            self.apply_tick(tick);
            consumed = true;
        }
        if !consumed {
            if let Some(scene) = self.scene() {
                if scene.local() == LocalTickMode::InterpolateLocal {
                    scene.on_update.fire(&());
                    self.flush_scene_changes();
                }
            }
        }
        self.clock_ms
            .set(self.clock_ms.get() + 1000.0 / f64::from(self.fps));
    }

    fn apply_tick(&self, tick: Tick) {
        trace!(play_id = %self.play_id, age = tick.age, "applying tick");
        for event in tick.events {
            self.dispatch(event);
        }
        if let Some(scene) = self.scene() {
            scene.on_update.fire(&());
        }
        self.consumed_ticks.set(self.consumed_ticks.get() + 1);
        self.flush_scene_changes();
    }

    fn dispatch(&self, event: PlaylogEvent) {
        match event {
            PlaylogEvent::Join { player_id, name, .. } => {
                self.on_join.fire(&JoinEvent { player_id, name });
            }
            PlaylogEvent::Leave { player_id, .. } => {
                self.on_leave.fire(&LeaveEvent { player_id });
            }
            PlaylogEvent::Timestamp { timestamp, .. } => {
                self.last_timestamp.set(Some(timestamp));
            }
            PlaylogEvent::Message {
                priority,
                player_id,
                data,
            } => {
                if let Some(scene) = self.scene() {
                    scene.on_message.fire(&MessageEvent {
                        priority,
                        player_id,
                        data,
                    });
                }
            }
            PlaylogEvent::Other { code, .. } => {
                trace!(code, "ignoring event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::scene::SceneConfig;

    fn active_game() -> Rc<Game> {
        Game::new(GameConfig::default(), External::default())
    }

    fn manual_scene(name: &str) -> Rc<Scene> {
        Scene::new(SceneConfig {
            name: name.into(),
            local: LocalTickMode::InterpolateLocal,
            tick_generation: TickGenerationMode::Manual,
        })
    }

    #[test]
    fn by_clock_commits_a_tick_every_pass() {
        let game = active_game();
        game.raise_event(PlaylogEvent::message(0, None, json!(1)));
        game.process_events();
        game.process_events();
        let ticks = game.take_outgoing_ticks();
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].events.len(), 1);
        assert!(ticks[1].events.is_empty());
        assert_eq!(ticks[1].age, 1);
    }

    #[test]
    fn manual_mode_buffers_until_raise_tick() {
        let game = active_game();
        game.push_scene(manual_scene("m"));
        game.flush_scene_changes();
        game.raise_event(PlaylogEvent::message(0, None, json!("a")));
        game.process_events();
        assert!(game.take_outgoing_ticks().is_empty());
        game.raise_tick(vec![PlaylogEvent::timestamp(5)]).unwrap();
        let ticks = game.take_outgoing_ticks();
        assert_eq!(
            ticks[0].events,
            vec![
                PlaylogEvent::message(0, None, json!("a")),
                PlaylogEvent::timestamp(5)
            ]
        );
    }

    #[test]
    fn passive_instances_forward_and_cannot_tick() {
        let game = Game::new(
            GameConfig {
                active: false,
                ..GameConfig::default()
            },
            External::default(),
        );
        game.raise_event(PlaylogEvent::message(0, None, json!(1)));
        assert_eq!(game.take_outgoing_events().len(), 1);
        assert_eq!(game.raise_tick(Vec::new()), Err(EngineError::NotActiveInstance));
    }

    #[test]
    fn filters_run_in_order_and_defer() {
        let game = active_game();
        game.add_event_filter(
            |events, control| {
                events
                    .into_iter()
                    .filter(|e| {
                        if matches!(e, PlaylogEvent::Message { data, .. } if data == &json!("later")) {
                            control.process_next(PlaylogEvent::message(0, None, json!("again")));
                            false
                        } else {
                            true
                        }
                    })
                    .collect()
            },
            false,
        );
        game.add_event_filter(
            |mut events, _| {
                events.push(PlaylogEvent::timestamp(1));
                events
            },
            true,
        );
        game.raise_event(PlaylogEvent::message(0, None, json!("later")));
        game.process_events();
        game.process_events();
        let ticks = game.take_outgoing_ticks();
        assert_eq!(ticks[0].events, vec![PlaylogEvent::timestamp(1)]);
        assert_eq!(
            ticks[1].events,
            vec![
                PlaylogEvent::message(0, None, json!("again")),
                PlaylogEvent::timestamp(1)
            ]
        );
    }

    #[test]
    fn remove_event_filter_stops_it() {
        let game = active_game();
        let id = game.add_event_filter(|_, _| Vec::new(), true);
        assert!(game.remove_event_filter(id));
        assert!(!game.remove_event_filter(id));
        game.raise_event(PlaylogEvent::message(0, None, json!(1)));
        game.process_events();
        assert_eq!(game.take_outgoing_ticks()[0].events.len(), 1);
    }

    #[test]
    fn ticks_dispatch_to_the_current_scene() {
        let game = active_game();
        let scene = manual_scene("s");
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        scene
            .on_message
            .add(move |m: &MessageEvent| s.borrow_mut().push(m.data.clone()))
            .unwrap();
        let joins = Rc::new(Cell::new(0));
        let j = joins.clone();
        game.on_join.add(move |_: &JoinEvent| j.set(j.get() + 1)).unwrap();
        game.push_scene(scene);
        game.flush_scene_changes();
        game.receive_tick(Tick {
            age: 0,
            events: vec![
                PlaylogEvent::join("p1", None),
                PlaylogEvent::message(0, Some("p1".into()), json!("hi")),
                PlaylogEvent::timestamp(99),
            ],
        });
        game.consume_ticks();
        assert_eq!(*seen.borrow(), vec![json!("hi")]);
        assert_eq!(joins.get(), 1);
        assert_eq!(game.last_timestamp(), Some(99));
        assert_eq!(game.age(), 1);
    }

    #[test]
    fn interpolate_local_updates_without_ticks() {
        let game = active_game();
        let scene = manual_scene("s");
        let updates = Rc::new(Cell::new(0));
        let u = updates.clone();
        scene.on_update.add(move |_: &()| u.set(u.get() + 1)).unwrap();
        game.push_scene(scene);
        game.flush_scene_changes();
        game.consume_ticks();
        game.consume_ticks();
        assert_eq!(updates.get(), 2);
        assert!((game.current_time() - 2000.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn scene_changes_apply_after_the_tick() {
        let game = active_game();
        let first = manual_scene("first");
        let second = manual_scene("second");
        let weak = Rc::downgrade(&game);
        let next = second.clone();
        first
            .on_message
            .add_once(move |_: &MessageEvent| {
                if let Some(g) = weak.upgrade() {
                    g.replace_scene(next.clone());
                }
            })
            .unwrap();
        let first_messages = Rc::new(Cell::new(0));
        let f = first_messages.clone();
        first
            .on_message
            .add(move |_: &MessageEvent| f.set(f.get() + 1))
            .unwrap();
        game.push_scene(first.clone());
        game.flush_scene_changes();
        game.receive_tick(Tick {
            age: 0,
            events: vec![
                PlaylogEvent::message(0, None, json!(1)),
                PlaylogEvent::message(0, None, json!(2)),
            ],
        });
        game.consume_ticks();
        assert_eq!(first_messages.get(), 2);
        assert_eq!(first.state(), SceneState::Destroyed);
        assert_eq!(game.scene().map(|s| s.name().to_owned()), Some("second".into()));
        assert_eq!(game.scene_count(), 1);
    }

    #[test]
    fn plugins_register_once() {
        let game = active_game();
        assert!(game.register_plugin("coe"));
        assert!(!game.register_plugin("coe"));
    }

    #[test]
    fn push_and_pop_restore_the_previous_scene() {
        let game = active_game();
        let base = manual_scene("base");
        game.push_scene(base.clone());
        game.push_scene(manual_scene("top"));
        game.flush_scene_changes();
        assert_eq!(base.state(), SceneState::Deactive);
        game.pop_scene();
        game.flush_scene_changes();
        assert_eq!(base.state(), SceneState::Active);
        assert_eq!(game.scene_count(), 1);
    }
}
