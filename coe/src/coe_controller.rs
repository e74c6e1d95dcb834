// Controller with the session-control protocol built in.
//
// `CoeController` watches its own `on_action_receive` for session-control
// messages from the trusted sender and reacts before application handlers
// registered later see the same action:
// - `start`: fire `on_start_session_request`, then hold incoming message
//   events back for exactly one update pulse, so the application can set up
//   the session before regular actions arrive.
// - `child_start` / `child_end`: broadcast the payload verbatim. The session
//   bridge on every instance forwards it to the coe plugin.
// - `end`: `broadcast_end` with the carried result.
//
// Recognition goes by the `type` tag only. `child_*` payloads are forwarded
// whatever else they contain; malformed fields are for the bridge to report.
// Untrusted senders and foreign payloads are left to the application.
//
// `destroy` tracks its own lifecycle, so it still releases this controller's
// own subscriptions when the base controller was destroyed first.

use std::cell::Cell;
use std::rc::{Rc, Weak};

use coe_engine::{HandlerId, Trigger};
use coe_messages::{CoeMessage, CoeMessageKind, SessionEndMessage, SessionStartMessage, is_truthy};
use serde_json::Value;
use tracing::{debug, warn};

use crate::action::Action;
use crate::context::CoeContext;
use crate::controller::{BaseController, Controller};
use crate::error::{CoeError, CoeResult};

pub struct CoeController {
    base: BaseController,
    context: Rc<CoeContext>,
    weak_self: Weak<CoeController>,
    action_handler: Cell<Option<HandlerId>>,
    destroyed: Cell<bool>,
    pub on_start_session_request: Trigger<SessionStartMessage>,
}

impl Controller for CoeController {
    fn base(&self) -> &BaseController {
        &self.base
    }
}

impl CoeController {
    pub fn new(context: &Rc<CoeContext>) -> CoeResult<Rc<Self>> {
        let controller = Rc::new_cyclic(|weak_self| Self {
            base: BaseController::new(),
            context: context.clone(),
            weak_self: weak_self.clone(),
            action_handler: Cell::new(None),
            destroyed: Cell::new(false),
            on_start_session_request: Trigger::new(),
        });
        let weak = controller.weak_self.clone();
        let handler = controller.base.on_action_receive.add(move |action: &Action| {
            if let Some(controller) = weak.upgrade() {
                if let Err(err) = controller.handle_action(action) {
                    warn!(%err, "session-control action failed");
                }
            }
        })?;
        controller.action_handler.set(Some(handler));
        Ok(controller)
    }

    /// Broadcast that this session is over. Every instance's session bridge
    /// then reports the end, with `result` when given.
    pub fn broadcast_end(&self, result: Option<Value>) -> CoeResult<()> {
        let message = CoeMessage::End(SessionEndMessage {
            session_id: Some(self.context.session_id()),
            result: result.filter(|r| !r.is_null()),
        });
        self.base.broadcast(&message, 0)
    }

    fn handle_action(&self, action: &Action) -> CoeResult<()> {
        if !is_truthy(&action.data) || !self.context.is_trusted_action(action) {
            return Ok(());
        }
        let Some(kind) = CoeMessageKind::of(&action.data) else {
            return Ok(());
        };
        debug!(kind = kind.as_str(), "trusted session-control message");
        match kind {
            CoeMessageKind::Start => {
                let start = SessionStartMessage::decode_lenient(&action.data);
                self.on_start_session_request.fire(&start);
                self.base.set_processing_locked(true);
                let weak = self.weak_self.clone();
                self.base.on_update.add_once(move |_: &()| {
                    if let Some(controller) = weak.upgrade() {
                        controller.base.set_processing_locked(false);
                    }
                })?;
            }
            CoeMessageKind::ChildStart | CoeMessageKind::ChildEnd => {
                self.base.broadcast(&action.data, 0)?;
            }
            CoeMessageKind::End => {
                let end = SessionEndMessage::decode_lenient(&action.data);
                if !end.rejected.is_empty() {
                    warn!(rejected = ?end.rejected, "end carries malformed fields");
                }
                self.broadcast_end(end.message.result)?;
            }
        }
        Ok(())
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    pub fn destroy(&self) -> CoeResult<()> {
        if self.destroyed.replace(true) {
            return Err(CoeError::AlreadyDestroyed("controller"));
        }
        if let Some(id) = self.action_handler.take() {
            self.base.on_action_receive.remove(id);
        }
        self.on_start_session_request.destroy()?;
        if self.base.is_destroyed() {
            return Ok(());
        }
        self.base.destroy()
    }
}
