// Session functions: child sessions through the coe plugin, and this
// session's own end through the send channel.
//
// Every function here is a no-op (with a log line) when the collaborator it
// needs was not provided to the game.

use coe_engine::{ExitSessionParameters, MessageHandler, StartSessionParameters};
use coe_messages::{
    ApplicationIdentifier, CoeMessage, ContentSize, ExternalMessage, PlaylogEvent, SessionId,
    SessionStartMessage,
};
use serde::Deserialize;
use serde_json::{Number, Value};
use tracing::{debug, info};

use crate::context::{CoeContext, TRUSTED_PLAYER_ID};
use crate::error::CoeResult;

/// Parameters for a session that runs only on this instance.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StartLocalSessionParameters {
    pub application: Option<ApplicationIdentifier>,
    pub cascade_applications: Option<Vec<ApplicationIdentifier>>,
    pub delay_range: Option<Number>,
    /// Start message delivered to the local session as its first event,
    /// sent as the trusted player.
    pub message: Option<SessionStartMessage>,
    #[serde(skip)]
    pub message_handler: Option<MessageHandler>,
    pub additional_data: Option<Value>,
    pub size: Option<ContentSize>,
    pub playlog: Option<Value>,
}

impl CoeContext {
    /// Ask the coe plugin to start a child session.
    pub fn start_session(&self, parameters: StartSessionParameters) {
        match &self.game().external().coe {
            Some(plugin) => {
                info!(session_id = %parameters.session_id, "starting child session");
                plugin.start_session(parameters);
            }
            None => debug!(session_id = %parameters.session_id, "no coe plugin; start ignored"),
        }
    }

    /// Ask the coe plugin to close a child session.
    pub fn exit_session(&self, session_id: &SessionId, parameters: Option<ExitSessionParameters>) {
        match &self.game().external().coe {
            Some(plugin) => {
                info!(%session_id, "exiting child session");
                plugin.exit_session(session_id, parameters);
            }
            None => debug!(%session_id, "no coe plugin; exit ignored"),
        }
    }

    /// Start a session local to this instance. Its id is `{play_id}-{n}`
    /// with `n` counting this context's local sessions.
    pub fn start_local_session(
        &self,
        parameters: StartLocalSessionParameters,
    ) -> CoeResult<SessionId> {
        let count = self.local_session_count.get();
        self.local_session_count.set(count + 1);
        let session_id = SessionId::new(format!("{}-{}", self.game().play_id(), count));

        let local_events = match parameters.message {
            Some(message) => Some(vec![PlaylogEvent::message(
                0,
                Some(TRUSTED_PLAYER_ID.to_owned()),
                serde_json::to_value(CoeMessage::Start(message))?,
            )]),
            None => None,
        };
        self.start_session(StartSessionParameters {
            local: Some(true),
            application: parameters.application,
            cascade_applications: parameters.cascade_applications,
            delay_range: parameters.delay_range,
            additional_data: parameters.additional_data,
            size: parameters.size,
            playlog: parameters.playlog,
            message_handler: parameters.message_handler,
            local_events,
            ..StartSessionParameters::new(session_id.clone())
        });
        Ok(session_id)
    }

    /// End this session. The send channel receives an `end` message carrying
    /// `result` when there is one.
    pub fn exit(&self, result: Option<Value>) {
        let result = result.filter(|r| !r.is_null());
        match &self.game().external().send {
            Some(send) => {
                info!(session_id = %self.session_id(), has_result = result.is_some(), "session end");
                send.send(ExternalMessage::end(self.session_id(), result));
            }
            None => debug!("no send channel; session end not reported"),
        }
    }
}
