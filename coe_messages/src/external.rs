// Outward-facing messages sent to the hosting platform.
//
// `ExternalMessage` is the envelope handed to the external "send"
// collaborator. It deliberately has no relation to `CoeMessage`: its `type`
// is a free-form string (`"end"`, `"result"`, `"function_end"`, ...) and the
// two tag spaces must never be mixed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::SessionId;

/// Well-known `type` values of external messages.
pub mod kinds {
    /// The session is over, optionally with a final result.
    pub const END: &str = "end";
    /// Intermediate result; the final one travels with `end`.
    pub const RESULT: &str = "result";
    /// The session's function is done, though the session itself continues.
    pub const FUNCTION_END: &str = "function_end";
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalMessage {
    #[serde(rename = "type")]
    pub kind: String,
    /// Destination. Absent means the parent session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Application-assigned id for correlating messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ExternalMessage {
    pub fn new(kind: impl Into<String>, session_id: SessionId) -> Self {
        Self {
            kind: kind.into(),
            target: None,
            id: None,
            session_id,
            data: None,
        }
    }

    /// `end` message. `data` is `{result}` when a result exists and is
    /// omitted entirely otherwise.
    pub fn end(session_id: SessionId, result: Option<Value>) -> Self {
        let mut msg = Self::new(kinds::END, session_id);
        msg.data = result.map(wrap_result);
        msg
    }

    /// Intermediate `result` message.
    pub fn result(session_id: SessionId, result: Value) -> Self {
        let mut msg = Self::new(kinds::RESULT, session_id);
        msg.data = Some(wrap_result(result));
        msg
    }

    /// `function_end` message carrying application-specific data.
    pub fn function_end(session_id: SessionId, data: Option<Value>) -> Self {
        let mut msg = Self::new(kinds::FUNCTION_END, session_id);
        msg.data = data;
        msg
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }
}

fn wrap_result(result: Value) -> Value {
    let mut map = Map::new();
    map.insert("result".into(), result);
    Value::Object(map)
}
