// External collaborators reachable from a game instance.
//
// The hosting platform may expose two services to a running game:
// - the **coe plugin**, which starts and exits child sessions and injects
//   local events into them;
// - the **send** channel, which carries `ExternalMessage`s to the parent
//   session.
//
// Either may be missing (a standalone run has neither). The coordination
// layer checks for presence and logs when a call has nowhere to go.

use std::fmt;
use std::rc::Rc;

use coe_messages::{
    ApplicationIdentifier, ContentSize, ExternalMessage, PlaylogEvent, SessionId,
};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Callback the plugin invokes with messages coming back from a child
/// session.
#[derive(Clone)]
pub struct MessageHandler(Rc<dyn Fn(&ExternalMessage)>);

impl MessageHandler {
    pub fn new(handler: impl Fn(&ExternalMessage) + 'static) -> Self {
        Self(Rc::new(handler))
    }

    pub fn call(&self, message: &ExternalMessage) {
        (self.0)(message)
    }
}

impl fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MessageHandler(..)")
    }
}

/// Parameters for starting a child session through the plugin.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionParameters {
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_range: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<ApplicationIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cascade_applications: Option<Vec<ApplicationIdentifier>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_events: Option<Vec<PlaylogEvent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_sendable_players: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<ContentSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlog: Option<Value>,
    /// Not part of the wire form; only meaningful for local sessions.
    #[serde(skip)]
    pub message_handler: Option<MessageHandler>,
}

impl StartSessionParameters {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            delay_range: None,
            application: None,
            cascade_applications: None,
            local: None,
            local_events: None,
            event_sendable_players: None,
            additional_data: None,
            size: None,
            playlog: None,
            message_handler: None,
        }
    }
}

/// Options for exiting a child session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitSessionParameters {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub needs_result: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub needs_playlog: bool,
}

/// The platform's child-session service.
pub trait CoePlugin {
    fn start_session(&self, parameters: StartSessionParameters);
    fn exit_session(&self, session_id: &SessionId, parameters: Option<ExitSessionParameters>);
    fn send_local_events(&self, session_id: &SessionId, events: Vec<PlaylogEvent>);
}

/// The platform's outbound message channel.
pub trait ExternalSender {
    fn send(&self, message: ExternalMessage);
}

/// The collaborators a game instance was started with.
#[derive(Clone, Default)]
pub struct External {
    pub coe: Option<Rc<dyn CoePlugin>>,
    pub send: Option<Rc<dyn ExternalSender>>,
}

impl fmt::Debug for External {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("External")
            .field("coe", &self.coe.is_some())
            .field("send", &self.send.is_some())
            .finish()
    }
}
