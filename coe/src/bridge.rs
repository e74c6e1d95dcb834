// Session lifecycle bridge: session-control commands -> platform calls.
//
// `CoeMessageEventHandler` is the default `SceneWatcher`. On every scene
// activation it (re)registers a message handler on that scene, removing its
// previous registration there first. This keeps a single registration per
// scene, placed after the application's own handlers.
//
// Every instance runs the bridge, so a command broadcast once by the
// controller reaches the platform once per instance:
// - `child_start` -> `CoeContext::start_session`
// - `child_end`   -> `CoeContext::exit_session` with the legacy
//                    `needsResult` / `needsPlaylog` flags
// - `end`         -> `CoeContext::exit`
// Other payloads are not the bridge's business.
//
// Payloads are recognised by their `type` tag and read field by field.
// A malformed field is logged and left out of the platform call. Only a
// `child_*` message without a usable `sessionId` cannot be forwarded.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use coe_engine::{
    ExitSessionParameters, HandlerId, MessageEvent, Scene, StartSessionParameters,
};
use coe_messages::{
    ChildSessionEndMessage, ChildSessionStartMessage, CoeMessageKind, SessionEndMessage,
};
use tracing::{debug, trace, warn};

use crate::context::CoeContext;
use crate::watcher::SceneWatcher;

pub struct CoeMessageEventHandler {
    context: Weak<CoeContext>,
    registrations: RefCell<Vec<(Weak<Scene>, HandlerId)>>,
}

impl CoeMessageEventHandler {
    pub fn new(context: Weak<CoeContext>) -> Self {
        Self {
            context,
            registrations: RefCell::new(Vec::new()),
        }
    }

    fn handle_message(context: &CoeContext, event: &MessageEvent) {
        let Some(kind) = CoeMessageKind::of(&event.data) else {
            return;
        };
        match kind {
            CoeMessageKind::ChildStart => {
                match ChildSessionStartMessage::decode_lenient(&event.data) {
                    Ok(decoded) => {
                        report_rejected(kind, &decoded.rejected);
                        let start = decoded.message;
                        debug!(session_id = %start.session_id, "bridging child_start");
                        context.start_session(start_parameters(start));
                    }
                    Err(err) => warn!(%err, "child_start not forwarded"),
                }
            }
            CoeMessageKind::ChildEnd => match ChildSessionEndMessage::decode_lenient(&event.data) {
                Ok(decoded) => {
                    report_rejected(kind, &decoded.rejected);
                    let end = decoded.message;
                    debug!(session_id = %end.session_id, "bridging child_end");
                    context.exit_session(
                        &end.session_id,
                        Some(ExitSessionParameters {
                            needs_result: end.needs_result,
                            needs_playlog: end.needs_playlog,
                        }),
                    );
                }
                Err(err) => warn!(%err, "child_end not forwarded"),
            },
            CoeMessageKind::End => {
                let decoded = SessionEndMessage::decode_lenient(&event.data);
                report_rejected(kind, &decoded.rejected);
                debug!("bridging end");
                context.exit(decoded.message.result);
            }
            CoeMessageKind::Start => trace!("start is handled by the controller"),
        }
    }
}

fn report_rejected(kind: CoeMessageKind, rejected: &[&'static str]) {
    if !rejected.is_empty() {
        warn!(kind = kind.as_str(), ?rejected, "malformed fields left out");
    }
}

impl SceneWatcher for CoeMessageEventHandler {
    fn handle_scene(&self, scene: &Rc<Scene>) {
        let mut registrations = self.registrations.borrow_mut();
        registrations.retain(|(s, id)| match s.upgrade() {
            Some(s) if Rc::ptr_eq(&s, scene) => {
                s.on_message.remove(*id);
                false
            }
            Some(s) => !s.is_destroyed(),
            None => false,
        });

        let context = self.context.clone();
        let added = scene.on_message.add(move |event: &MessageEvent| {
            if let Some(context) = context.upgrade() {
                Self::handle_message(&context, event);
            }
        });
        match added {
            Ok(id) => registrations.push((Rc::downgrade(scene), id)),
            Err(err) => debug!(scene = scene.name(), %err, "scene gone before bridging"),
        }
    }
}

fn start_parameters(start: ChildSessionStartMessage) -> StartSessionParameters {
    StartSessionParameters {
        delay_range: start.delay_range,
        application: start.application,
        cascade_applications: start.cascade_applications,
        local: start.local,
        local_events: start.local_events,
        event_sendable_players: start.event_sendable_players,
        additional_data: start.additional_data,
        size: start.size,
        playlog: start.playlog,
        ..StartSessionParameters::new(start.session_id)
    }
}
