// The COE scene: an engine scene whose event traffic is owned by a
// controller.
//
// Every message event raised on the play goes through this scene's event
// filter on the active instance and never reaches the tick as-is. It is
// turned into an `Action` for the controller instead. What views receive as
// message events (`on_command_receive`) are exclusively the controller's
// broadcasts.
//
// Filter pass (active instance, once per frame while the scene is active):
// 1. First pass since activation: emit `Timestamp(floor(now))` so the tick
//    stream carries a time anchor for the new scene.
// 2. Drain the controller's broadcast buffer into message events with no
//    player, in buffer order.
// 3. For each incoming event:
//    - message: if the controller holds intake, defer it to the next pass;
//      otherwise fire the controller's `on_action_receive` and drop it;
//    - join/leave: record it in the context's membership, pass it on;
//    - anything else: pass it on untouched.
//
// Update pulse (active instance): the controller's update runs, then, in
// manual tick mode, any buffered broadcasts are committed right away as
// `[Timestamp(floor(now)), Message...]` through `Game::raise_tick`, which
// skips the filter.
//
// The filter is installed on entering `Active` and removed on leaving it, so
// at most one filter per scene exists at any time.
//
// Ownership: the engine scene's handlers hold this scene, so it lives as
// long as the engine scene keeps its handlers, i.e. until it is destroyed.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use coe_engine::{
    FilterControl, FilterId, HandlerId, LocalTickMode, MessageEvent, SceneConfig, SceneState,
    TickGenerationMode, Trigger,
};
use coe_messages::PlaylogEvent;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::action::Action;
use crate::context::CoeContext;
use crate::controller::{BroadcastEntry, Controller};
use crate::error::{CoeError, CoeResult};

/// Construction parameters. COE scenes default to local interpolation and
/// manual tick generation.
#[derive(Clone, Debug)]
pub struct SceneParameters {
    pub name: String,
    pub local: LocalTickMode,
    pub tick_generation: TickGenerationMode,
}

impl Default for SceneParameters {
    fn default() -> Self {
        Self {
            name: String::new(),
            local: LocalTickMode::InterpolateLocal,
            tick_generation: TickGenerationMode::Manual,
        }
    }
}

impl SceneParameters {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

struct Subscriptions {
    message: HandlerId,
    state_change: HandlerId,
    update: Option<HandlerId>,
    load: Option<HandlerId>,
}

pub struct Scene {
    context: Rc<CoeContext>,
    controller: Rc<dyn Controller>,
    inner: Rc<coe_engine::Scene>,
    generates_tick_manually: bool,
    sent_initial_events: Cell<bool>,
    filter: Cell<Option<FilterId>>,
    subscriptions: RefCell<Option<Subscriptions>>,
    destroyed: Cell<bool>,
    pub on_command_receive: Trigger<Value>,
}

impl Scene {
    pub fn new(
        context: &Rc<CoeContext>,
        controller: Rc<dyn Controller>,
        params: SceneParameters,
    ) -> CoeResult<Rc<Self>> {
        let inner = coe_engine::Scene::new(SceneConfig {
            name: params.name,
            local: params.local,
            tick_generation: params.tick_generation,
        });
        let scene = Rc::new(Self {
            context: context.clone(),
            controller,
            generates_tick_manually: params.tick_generation == TickGenerationMode::Manual,
            inner,
            sent_initial_events: Cell::new(false),
            filter: Cell::new(None),
            subscriptions: RefCell::new(None),
            destroyed: Cell::new(false),
            on_command_receive: Trigger::new(),
        });

        let this = scene.clone();
        let message = scene
            .inner
            .on_message
            .add(move |event: &MessageEvent| this.on_command_receive.fire(&event.data))?;
        let this = scene.clone();
        let state_change = scene
            .inner
            .on_state_change
            .add(move |state: &SceneState| this.handle_state_change(*state))?;

        let mut update = None;
        let mut load = None;
        if context.game().is_active_instance() {
            let this = scene.clone();
            update = Some(scene.inner.on_update.add(move |_: &()| this.handle_update())?);
            let this = scene.clone();
            load = Some(scene.inner.on_load.add_once(move |_: &()| {
                if let Err(err) = this.controller.base().load() {
                    debug!(scene = this.name(), %err, "controller gone before load");
                }
            })?);
        }
        *scene.subscriptions.borrow_mut() = Some(Subscriptions {
            message,
            state_change,
            update,
            load,
        });
        Ok(scene)
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// The engine scene to hand to `Game::push_scene` and friends.
    pub fn engine_scene(&self) -> &Rc<coe_engine::Scene> {
        &self.inner
    }

    pub fn state(&self) -> SceneState {
        self.inner.state()
    }

    pub fn has_event_filter(&self) -> bool {
        self.filter.get().is_some()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    /// Send an action to the controller, attributed to this instance's
    /// player.
    pub fn send<A: Serialize + ?Sized>(&self, data: &A, priority: i32) -> CoeResult<()> {
        if self.destroyed.get() {
            return Err(CoeError::Destroyed("scene"));
        }
        let game = self.context.game();
        let data = serde_json::to_value(data)?;
        game.raise_event(PlaylogEvent::message(
            priority,
            game.self_id().map(str::to_owned),
            data,
        ));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Event filter
    // -----------------------------------------------------------------------

    fn install_filter(self: &Rc<Self>) {
        self.uninstall_filter();
        let weak: Weak<Self> = Rc::downgrade(self);
        let id = self.context.game().add_event_filter(
            move |events, control| match weak.upgrade() {
                Some(scene) => scene.filter_events(events, control),
                None => events,
            },
            true,
        );
        self.filter.set(Some(id));
        self.sent_initial_events.set(false);
        debug!(scene = self.name(), "event filter installed");
    }

    fn uninstall_filter(&self) {
        if let Some(id) = self.filter.take() {
            self.context.game().remove_event_filter(id);
            debug!(scene = self.name(), "event filter removed");
        }
    }

    fn filter_events(&self, events: Vec<PlaylogEvent>, control: &FilterControl) -> Vec<PlaylogEvent> {
        let mut filtered = Vec::with_capacity(events.len());
        if !self.sent_initial_events.replace(true) {
            filtered.push(self.timestamp());
        }
        let base = self.controller.base();
        match base.take_broadcast_buffer() {
            Ok(Some(entries)) => filtered.extend(entries.into_iter().map(command_event)),
            Ok(None) => {}
            Err(err) => trace!(scene = self.name(), %err, "no commands to drain"),
        }

        for event in events {
            let event = match event {
                PlaylogEvent::Message {
                    priority,
                    player_id,
                    data,
                } => {
                    if base.is_processing_locked() {
                        trace!(scene = self.name(), "message deferred while locked");
                        control.process_next(PlaylogEvent::Message {
                            priority,
                            player_id,
                            data,
                        });
                    } else {
                        trace!(scene = self.name(), ?player_id, "message converted to action");
                        base.on_action_receive.fire(&Action::new(player_id, data));
                    }
                    continue;
                }
                other => other,
            };
            match &event {
                PlaylogEvent::Join { player_id, .. } => self.context.add_joined_player(player_id),
                PlaylogEvent::Leave { player_id, .. } => {
                    self.context.remove_joined_player(player_id)
                }
                _ => {}
            }
            filtered.push(event);
        }
        filtered
    }

    fn timestamp(&self) -> PlaylogEvent {
        PlaylogEvent::timestamp(self.context.game().current_time().floor() as u64)
    }

    // -----------------------------------------------------------------------
    // Engine notifications
    // -----------------------------------------------------------------------

    fn handle_update(&self) {
        if let Err(err) = self.controller.base().update() {
            trace!(scene = self.name(), %err, "update pulse skipped");
            return;
        }
        if self.generates_tick_manually {
            if let Err(err) = self.raise_tick_if_broadcast_pending() {
                warn!(scene = self.name(), %err, "manual tick failed");
            }
        }
    }

    fn raise_tick_if_broadcast_pending(&self) -> CoeResult<()> {
        let Some(entries) = self.controller.base().take_broadcast_buffer()? else {
            return Ok(());
        };
        debug!(scene = self.name(), commands = entries.len(), "raising manual tick");
        let mut events = Vec::with_capacity(entries.len() + 1);
        events.push(self.timestamp());
        events.extend(entries.into_iter().map(command_event));
        self.context.game().raise_tick(events)?;
        Ok(())
    }

    fn handle_state_change(self: &Rc<Self>, state: SceneState) {
        match state {
            SceneState::Active => self.install_filter(),
            SceneState::Deactive | SceneState::BeforeDestroyed => self.uninstall_filter(),
            SceneState::Destroyed => {
                if !self.destroyed.replace(true) {
                    self.teardown();
                }
            }
            SceneState::Standby => {}
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Remove the event filter and every subscription, then destroy the
    /// engine scene.
    pub fn destroy(&self) -> CoeResult<()> {
        if self.destroyed.replace(true) {
            return Err(CoeError::AlreadyDestroyed("scene"));
        }
        self.teardown();
        if !self.inner.is_destroyed() {
            self.inner.destroy()?;
        }
        Ok(())
    }

    fn teardown(&self) {
        self.uninstall_filter();
        if let Some(subs) = self.subscriptions.borrow_mut().take() {
            self.inner.on_message.remove(subs.message);
            self.inner.on_state_change.remove(subs.state_change);
            if let Some(update) = subs.update {
                self.inner.on_update.remove(update);
            }
            if let Some(load) = subs.load {
                self.inner.on_load.remove(load);
            }
        }
        if let Err(err) = self.on_command_receive.destroy() {
            trace!(%err, "command trigger already gone");
        }
    }
}

fn command_event(entry: BroadcastEntry) -> PlaylogEvent {
    PlaylogEvent::message(entry.priority, None, entry.data)
}

#[cfg(test)]
mod tests {
    use coe_engine::{External, Game, GameConfig};
    use serde_json::json;

    use super::*;
    use crate::context::InitializeParameters;
    use crate::controller::BaseController;

    struct Fixture {
        game: Rc<Game>,
        controller: Rc<BaseController>,
        scene: Rc<Scene>,
        actions: Rc<RefCell<Vec<Action>>>,
    }

    fn fixture() -> Fixture {
        let game = Game::new(GameConfig::default(), External::default());
        let context = CoeContext::initialize(InitializeParameters::new(game.clone())).unwrap();
        let controller = Rc::new(BaseController::new());
        let actions = Rc::new(RefCell::new(Vec::new()));
        let a = actions.clone();
        controller
            .on_action_receive
            .add(move |action: &Action| a.borrow_mut().push(action.clone()))
            .unwrap();
        let scene = Scene::new(&context, controller.clone(), SceneParameters::named("s")).unwrap();
        game.push_scene(scene.engine_scene().clone());
        game.flush_scene_changes();
        Fixture {
            game,
            controller,
            scene,
            actions,
        }
    }

    fn run_filters(game: &Game, events: Vec<PlaylogEvent>) -> Vec<PlaylogEvent> {
        for event in events {
            game.raise_event(event);
        }
        game.process_events();
        // Manual mode: the pass output waits in the tick buffer.
        game.raise_tick(Vec::new()).unwrap();
        game.take_outgoing_ticks().remove(0).events
    }

    #[test]
    fn activation_installs_exactly_one_filter() {
        let f = fixture();
        assert!(f.scene.has_event_filter());
        assert_eq!(f.game.event_filter_count(), 1);
    }

    #[test]
    fn messages_become_actions_and_commands_follow_the_timestamp() {
        let f = fixture();
        f.controller.broadcast(&json!("cmd"), 3).unwrap();
        let events = run_filters(
            &f.game,
            vec![
                PlaylogEvent::message(0, Some("p1".into()), json!("hello")),
                PlaylogEvent::message(0, None, json!("anon")),
                PlaylogEvent::join("p2", None),
                PlaylogEvent::Other {
                    code: 0x21,
                    fields: vec![json!(0), json!("p1")],
                },
            ],
        );
        assert_eq!(
            events,
            vec![
                PlaylogEvent::timestamp(0),
                PlaylogEvent::message(3, None, json!("cmd")),
                PlaylogEvent::join("p2", None),
                PlaylogEvent::Other {
                    code: 0x21,
                    fields: vec![json!(0), json!("p1")],
                },
            ]
        );
        assert_eq!(
            *f.actions.borrow(),
            vec![
                Action::new(Some("p1".into()), json!("hello")),
                Action::new(None, json!("anon")),
            ]
        );
        assert!(f.scene.context.is_joined_player("p2"));
    }

    #[test]
    fn timestamp_only_on_first_pass_per_activation() {
        let f = fixture();
        let first = run_filters(&f.game, Vec::new());
        let second = run_filters(&f.game, Vec::new());
        assert_eq!(first, vec![PlaylogEvent::timestamp(0)]);
        assert!(second.is_empty());

        // Cover and uncover the scene: a fresh activation gets a fresh anchor.
        let context = f.scene.context.clone();
        let other = Scene::new(&context, f.controller.clone(), SceneParameters::named("o")).unwrap();
        f.game.push_scene(other.engine_scene().clone());
        f.game.flush_scene_changes();
        assert!(!f.scene.has_event_filter());
        f.game.pop_scene();
        f.game.flush_scene_changes();
        assert!(f.scene.has_event_filter());
        assert_eq!(f.game.event_filter_count(), 1);
        assert_eq!(run_filters(&f.game, Vec::new()), vec![PlaylogEvent::timestamp(0)]);
    }

    #[test]
    fn locked_messages_are_deferred_not_dropped() {
        let f = fixture();
        run_filters(&f.game, Vec::new());
        f.controller.set_processing_locked(true);
        let events = run_filters(
            &f.game,
            vec![PlaylogEvent::message(0, Some("p1".into()), json!(1))],
        );
        assert!(events.is_empty());
        assert!(f.actions.borrow().is_empty());

        f.controller.set_processing_locked(false);
        run_filters(&f.game, Vec::new());
        assert_eq!(
            *f.actions.borrow(),
            vec![Action::new(Some("p1".into()), json!(1))]
        );
    }

    #[test]
    fn deferred_messages_go_first_and_order_is_kept() {
        let f = fixture();
        run_filters(&f.game, Vec::new());
        let message = |n: i32| PlaylogEvent::message(0, Some("p1".into()), json!(n));

        f.controller.set_processing_locked(true);
        assert!(run_filters(&f.game, vec![message(1)]).is_empty());
        let passed = run_filters(&f.game, vec![message(2), PlaylogEvent::join("p2", None)]);
        assert_eq!(passed, vec![PlaylogEvent::join("p2", None)]);
        assert!(f.actions.borrow().is_empty());

        f.controller.set_processing_locked(false);
        let passed = run_filters(&f.game, vec![message(3), PlaylogEvent::leave("p2")]);
        assert_eq!(passed, vec![PlaylogEvent::leave("p2")]);
        assert_eq!(
            *f.actions.borrow(),
            vec![
                Action::new(Some("p1".into()), json!(1)),
                Action::new(Some("p1".into()), json!(2)),
                Action::new(Some("p1".into()), json!(3)),
            ]
        );
    }

    #[test]
    fn teardown_before_load_releases_the_load_handler() {
        let game = Game::new(GameConfig::default(), External::default());
        let context = CoeContext::initialize(InitializeParameters::new(game)).unwrap();
        let controller = Rc::new(BaseController::new());
        let scene = Scene::new(&context, controller, SceneParameters::named("never-loaded")).unwrap();
        assert_eq!(scene.engine_scene().on_load.len(), 1);

        scene.teardown();
        assert!(scene.engine_scene().on_load.is_empty());
        assert!(scene.engine_scene().on_update.is_empty());
        assert_eq!(Rc::strong_count(&scene), 1);
    }

    #[test]
    fn update_pulse_raises_a_manual_tick_for_pending_commands() {
        let f = fixture();
        f.game.consume_ticks();
        assert!(f.game.take_outgoing_ticks().is_empty());

        f.controller.broadcast(&json!({"n": 1}), 0).unwrap();
        f.game.consume_ticks();
        let ticks = f.game.take_outgoing_ticks();
        assert_eq!(ticks.len(), 1);
        let now = (1000.0_f64 / 30.0).floor() as u64;
        assert_eq!(
            ticks[0].events,
            vec![
                PlaylogEvent::timestamp(now),
                PlaylogEvent::message(0, None, json!({"n": 1}))
            ]
        );
        assert_eq!(f.controller.take_broadcast_buffer().unwrap(), None);
    }

    #[test]
    fn delivered_messages_fire_commands() {
        let f = fixture();
        let commands = Rc::new(RefCell::new(Vec::new()));
        let c = commands.clone();
        f.scene
            .on_command_receive
            .add(move |v: &Value| c.borrow_mut().push(v.clone()))
            .unwrap();
        f.game.receive_tick(coe_engine::Tick {
            age: 0,
            events: vec![PlaylogEvent::message(0, None, json!("cmd"))],
        });
        f.game.consume_ticks();
        assert_eq!(*commands.borrow(), vec![json!("cmd")]);
    }

    #[test]
    fn send_attributes_to_self() {
        let f = fixture();
        f.scene.send(&json!({"a": 1}), 2).unwrap();
        run_filters(&f.game, Vec::new());
        assert_eq!(*f.actions.borrow(), vec![Action::new(None, json!({"a": 1}))]);
    }

    #[test]
    fn destroy_removes_filter_and_refuses_twice() {
        let f = fixture();
        f.scene.destroy().unwrap();
        assert_eq!(f.game.event_filter_count(), 0);
        assert!(f.scene.on_command_receive.is_destroyed());
        assert!(f.scene.engine_scene().is_destroyed());
        assert!(matches!(
            f.scene.destroy(),
            Err(CoeError::AlreadyDestroyed("scene"))
        ));
        assert!(matches!(
            f.scene.send(&json!(1), 0),
            Err(CoeError::Destroyed("scene"))
        ));
    }

    #[test]
    fn replaced_scene_tears_itself_down() {
        let f = fixture();
        let context = f.scene.context.clone();
        let next = Scene::new(&context, f.controller.clone(), SceneParameters::named("n")).unwrap();
        f.game.replace_scene(next.engine_scene().clone());
        f.game.flush_scene_changes();
        assert!(f.scene.is_destroyed());
        assert!(next.has_event_filter());
        assert_eq!(f.game.event_filter_count(), 1);
    }
}
