// Per-instance coordination state: permission, roles, identity, membership.
//
// `CoeContext::initialize` is the entry point of the library. It is called
// once per game instance, before any controller or scene is built, and
// returns the shared `Rc<CoeContext>` everything else hangs off.
//
// Permission resolution:
// - Served deployments pass `{"coe": {...}}` in the launch arguments. The
//   flags, roles and debug mode are taken from there verbatim.
// - Otherwise the instance's role decides. The active instance gets every
//   permission and the `broadcaster` role. A passive instance with no player
//   of its own is trusted local execution and also gets every permission.
//   Everyone else gets none.
//
// Membership: the joined-player list follows the game's join/leave
// notifications on every instance. The active instance's event filter also
// records joins and leaves as they pass through (see `scene.rs`). Both
// operations are idempotent, so the two paths never conflict.
//
// See also: `session.rs` for the session functions implemented on this
// type, `bridge.rs` for the default scene watcher installed here.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use coe_engine::{Game, HandlerId, JoinEvent, LeaveEvent};
use coe_messages::SessionId;
use serde_json::Value;
use tracing::{debug, info};

use crate::action::Action;
use crate::bridge::CoeMessageEventHandler;
use crate::config::{InitializeArguments, Permission};
use crate::error::{CoeError, CoeResult};
use crate::watcher::{SceneWatcher, SceneWatcherHandle};

/// Player id reserved for the hosting system. Only actions from this id may
/// issue session-control messages.
pub const TRUSTED_PLAYER_ID: &str = ":akashic";

/// Role given to the active instance when the deployment assigns none.
pub const BROADCASTER_ROLE: &str = "broadcaster";

const PLUGIN_NAME: &str = "coe";

pub struct InitializeParameters {
    pub game: Rc<Game>,
    /// Launch arguments. Usually the game's own.
    pub args: Option<Value>,
    /// Whether the instance runs inside the development sandbox, where every
    /// action is trusted.
    pub sandbox: bool,
    /// Replaces the default `CoeMessageEventHandler`.
    pub scene_watcher: Option<Rc<dyn SceneWatcher>>,
}

impl InitializeParameters {
    pub fn new(game: Rc<Game>) -> Self {
        Self {
            args: game.args().cloned(),
            game,
            sandbox: false,
            scene_watcher: None,
        }
    }
}

pub struct CoeContext {
    game: Rc<Game>,
    permission: Permission,
    roles: Vec<String>,
    debug_mode: bool,
    sandbox: bool,
    joined_players: RefCell<Vec<String>>,
    pub(crate) local_session_count: Cell<u64>,
    membership_handlers: Cell<Option<(HandlerId, HandlerId)>>,
    watcher: RefCell<Option<SceneWatcherHandle>>,
}

impl CoeContext {
    pub fn initialize(params: InitializeParameters) -> CoeResult<Rc<Self>> {
        let InitializeParameters {
            game,
            args,
            sandbox,
            scene_watcher,
        } = params;
        let arguments = InitializeArguments::from_args(args.as_ref())?;
        if !game.register_plugin(PLUGIN_NAME) {
            return Err(CoeError::AlreadyInitialized);
        }

        let (permission, roles, debug_mode) = match arguments.coe {
            Some(coe) => (
                coe.permission,
                coe.roles.unwrap_or_default(),
                coe.debug_mode.unwrap_or(false),
            ),
            None if game.is_active_instance() => {
                (Permission::all(), vec![BROADCASTER_ROLE.to_owned()], false)
            }
            None if game.self_id().is_none() => (Permission::all(), Vec::new(), false),
            None => (Permission::none(), Vec::new(), false),
        };
        info!(
            play_id = game.play_id(),
            active = game.is_active_instance(),
            ?permission,
            ?roles,
            "coe initialized"
        );

        let context = Rc::new(Self {
            game,
            permission,
            roles,
            debug_mode,
            sandbox,
            joined_players: RefCell::new(Vec::new()),
            local_session_count: Cell::new(0),
            membership_handlers: Cell::new(None),
            watcher: RefCell::new(None),
        });

        let weak = Rc::downgrade(&context);
        let join = context.game.on_join.add(move |e: &JoinEvent| {
            if let Some(ctx) = weak.upgrade() {
                ctx.add_joined_player(&e.player_id);
            }
        })?;
        let weak = Rc::downgrade(&context);
        let leave = context.game.on_leave.add(move |e: &LeaveEvent| {
            if let Some(ctx) = weak.upgrade() {
                ctx.remove_joined_player(&e.player_id);
            }
        })?;
        context.membership_handlers.set(Some((join, leave)));

        let watcher: Rc<dyn SceneWatcher> = match scene_watcher {
            Some(watcher) => watcher,
            None => Rc::new(CoeMessageEventHandler::new(Rc::downgrade(&context))),
        };
        let handle = SceneWatcherHandle::attach(&context.game, watcher)?;
        *context.watcher.borrow_mut() = Some(handle);

        Ok(context)
    }

    pub fn game(&self) -> &Rc<Game> {
        &self.game
    }

    pub fn permission(&self) -> Permission {
        self.permission
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }

    pub fn is_sandbox(&self) -> bool {
        self.sandbox
    }

    /// This session's id: the play id of the game.
    pub fn session_id(&self) -> SessionId {
        SessionId::new(self.game.play_id())
    }

    pub fn is_joined_player(&self, player_id: &str) -> bool {
        self.joined_players.borrow().iter().any(|p| p == player_id)
    }

    /// Joined player ids, in join order.
    pub fn joined_players(&self) -> Vec<String> {
        self.joined_players.borrow().clone()
    }

    /// Record a join. Joining twice is not an error.
    pub fn add_joined_player(&self, player_id: &str) {
        let mut players = self.joined_players.borrow_mut();
        if !players.iter().any(|p| p == player_id) {
            debug!(player_id, "player joined");
            players.push(player_id.to_owned());
        }
    }

    /// Record a leave. Leaving without having joined is not an error.
    pub fn remove_joined_player(&self, player_id: &str) {
        let mut players = self.joined_players.borrow_mut();
        if let Some(index) = players.iter().position(|p| p == player_id) {
            debug!(player_id, "player left");
            players.remove(index);
        }
    }

    /// Whether `action` came from the hosting system.
    pub fn is_trusted_action(&self, action: &Action) -> bool {
        self.sandbox || action.player_id() == Some(TRUSTED_PLAYER_ID)
    }
}

impl Drop for CoeContext {
    fn drop(&mut self) {
        if let Some((join, leave)) = self.membership_handlers.take() {
            self.game.on_join.remove(join);
            self.game.on_leave.remove(leave);
        }
        if let Some(handle) = self.watcher.get_mut().take() {
            handle.detach();
        }
    }
}

#[cfg(test)]
mod tests {
    use coe_engine::{External, GameConfig};
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn game(active: bool, self_id: Option<&str>, args: Option<Value>) -> Rc<Game> {
        Game::new(
            GameConfig {
                active,
                self_id: self_id.map(str::to_owned),
                args,
                ..GameConfig::default()
            },
            External::default(),
        )
    }

    fn context(game: Rc<Game>) -> Rc<CoeContext> {
        CoeContext::initialize(InitializeParameters::new(game)).unwrap()
    }

    #[test]
    fn active_instance_gets_everything() {
        let ctx = context(game(true, None, None));
        assert_eq!(ctx.permission(), Permission::all());
        assert!(ctx.has_role(BROADCASTER_ROLE));
        assert!(!ctx.has_role("broad"));
        assert_eq!(ctx.session_id(), SessionId::new("0"));
    }

    #[test]
    fn passive_instance_permissions_depend_on_player() {
        let with_player = context(game(false, Some("passive-0"), None));
        assert_eq!(with_player.permission(), Permission::none());
        assert!(with_player.roles().is_empty());

        let local = context(game(false, None, None));
        assert_eq!(local.permission(), Permission::all());
        assert!(!local.has_role(BROADCASTER_ROLE));
    }

    #[test]
    fn served_arguments_win_over_inference() {
        let ctx = context(game(
            true,
            None,
            Some(json!({"coe": {"permission": {"aggregation": true}, "debugMode": true}})),
        ));
        assert_eq!(
            ctx.permission(),
            Permission {
                advance: false,
                aggregation: true,
                advance_request: false
            }
        );
        assert!(ctx.debug_mode());
        assert!(ctx.roles().is_empty());
    }

    #[test]
    fn second_initialize_is_rejected() {
        let game = game(true, None, None);
        let _ctx = context(game.clone());
        assert!(matches!(
            CoeContext::initialize(InitializeParameters::new(game)),
            Err(CoeError::AlreadyInitialized)
        ));
    }

    #[test]
    fn trusted_actions() {
        let ctx = context(game(true, None, None));
        assert!(ctx.is_trusted_action(&Action::new(Some(TRUSTED_PLAYER_ID.into()), json!(1))));
        assert!(!ctx.is_trusted_action(&Action::new(Some("p1".into()), json!(1))));
        assert!(!ctx.is_trusted_action(&Action::new(None, json!(1))));

        let mut params = InitializeParameters::new(game(true, None, None));
        params.sandbox = true;
        let sandbox = CoeContext::initialize(params).unwrap();
        assert!(sandbox.is_trusted_action(&Action::new(None, json!(1))));
    }

    #[test]
    fn membership_keeps_join_order() {
        let ctx = context(game(true, None, None));
        ctx.add_joined_player("b");
        ctx.add_joined_player("a");
        ctx.add_joined_player("b");
        assert_eq!(ctx.joined_players(), vec!["b", "a"]);
        ctx.remove_joined_player("b");
        ctx.remove_joined_player("b");
        assert_eq!(ctx.joined_players(), vec!["a"]);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Add(u8),
        Remove(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![(0u8..4).prop_map(Op::Add), (0u8..4).prop_map(Op::Remove)]
    }

    proptest! {
        #[test]
        fn membership_is_idempotent(ops in proptest::collection::vec(op(), 0..40)) {
            let ctx = context(game(true, None, None));
            let mut model: Vec<String> = Vec::new();
            for op in ops {
                match op {
                    Op::Add(p) => {
                        let id = p.to_string();
                        ctx.add_joined_player(&id);
                        ctx.add_joined_player(&id);
                        if !model.contains(&id) {
                            model.push(id);
                        }
                    }
                    Op::Remove(p) => {
                        let id = p.to_string();
                        ctx.remove_joined_player(&id);
                        ctx.remove_joined_player(&id);
                        model.retain(|m| *m != id);
                    }
                }
            }
            prop_assert_eq!(ctx.joined_players(), model.clone());
            for p in 0u8..4 {
                let id = p.to_string();
                prop_assert_eq!(ctx.is_joined_player(&id), model.contains(&id));
            }
        }
    }
}
