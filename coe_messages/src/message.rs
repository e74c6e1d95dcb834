// Internal coe messages.
//
// `CoeMessage` is the tagged union (`"type"`) of session-control messages
// exchanged inside a play: `start`, `end`, `child_start`, `child_end`. They
// travel as ordinary message-event payloads. The controller and the session
// bridge recognise them by their `type` tag alone (`CoeMessageKind::of`)
// and then read only the fields they consume, through the `decode_lenient`
// constructors. A field that fails to decode is left unset and reported in
// `Decoded::rejected`; it never hides the message itself. `from_payload` is
// the strict all-or-nothing decoder.
//
// `child_end` is the one shape with a custom wire mapping. Its `error` field
// is tested for truthiness on the wire, so decoding turns it into an explicit
// `ChildSessionOutcome`. A present but falsy `error` (`""`, `0`, `false`)
// decodes as success, and `Failure` can only be built from a truthy value.
//
// See also: `external.rs` for the outward-facing envelope, which shares no
// tag space with these messages.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::application::{ApplicationIdentifier, ContentSize};
use crate::error::{MessageError, MessageResult};
use crate::playlog::PlaylogEvent;
use crate::types::SessionId;

/// Session-control messages, tagged by `type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoeMessage {
    /// Request to start this session (only honoured from a trusted sender).
    Start(SessionStartMessage),
    /// This session is over.
    End(SessionEndMessage),
    /// Start a child session.
    ChildStart(ChildSessionStartMessage),
    /// A child session finished.
    ChildEnd(ChildSessionEndMessage),
}

impl CoeMessage {
    /// Decode a message-event payload. Returns `None` for payloads that are
    /// not coe messages.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }

    /// The wire tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::End(_) => "end",
            Self::ChildStart(_) => "child_start",
            Self::ChildEnd(_) => "child_end",
        }
    }
}

/// The `type` tags of session-control messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoeMessageKind {
    Start,
    End,
    ChildStart,
    ChildEnd,
}

impl CoeMessageKind {
    /// Read the tag of a payload without looking at anything else in it.
    pub fn of(payload: &Value) -> Option<Self> {
        match payload.get("type")?.as_str()? {
            "start" => Some(Self::Start),
            "end" => Some(Self::End),
            "child_start" => Some(Self::ChildStart),
            "child_end" => Some(Self::ChildEnd),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::ChildStart => "child_start",
            Self::ChildEnd => "child_end",
        }
    }
}

/// A message read field by field. `rejected` names the fields that were
/// present but malformed, and were left unset.
#[derive(Clone, Debug, PartialEq)]
pub struct Decoded<T> {
    pub message: T,
    pub rejected: Vec<&'static str>,
}

struct FieldReader<'a> {
    payload: &'a Value,
    rejected: Vec<&'static str>,
}

impl<'a> FieldReader<'a> {
    fn new(payload: &'a Value) -> Self {
        Self {
            payload,
            rejected: Vec::new(),
        }
    }

    /// Absent and `null` fields read as `None`.
    fn optional<T: DeserializeOwned>(&mut self, key: &'static str) -> Option<T> {
        let value = self.payload.get(key).filter(|v| !v.is_null())?;
        match T::deserialize(value) {
            Ok(decoded) => Some(decoded),
            Err(_) => {
                self.rejected.push(key);
                None
            }
        }
    }

    fn raw(&self, key: &str) -> Option<Value> {
        self.payload.get(key).filter(|v| !v.is_null()).cloned()
    }

    fn flag(&self, key: &str) -> bool {
        self.payload.get(key).is_some_and(is_truthy)
    }

    fn session_id(&mut self, kind: CoeMessageKind) -> MessageResult<SessionId> {
        self.optional("sessionId")
            .ok_or(MessageError::MissingSessionId(kind.as_str()))
    }

    fn finish<T>(self, message: T) -> Decoded<T> {
        Decoded {
            message,
            rejected: self.rejected,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionStartMessage {
    /// Application-defined start parameters.
    #[serde(default)]
    pub parameters: Value,
}

impl SessionStartMessage {
    pub fn decode_lenient(payload: &Value) -> Self {
        Self {
            parameters: payload.get("parameters").cloned().unwrap_or(Value::Null),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEndMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Final result. Omitted entirely when there is none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl SessionEndMessage {
    pub fn decode_lenient(payload: &Value) -> Decoded<Self> {
        let mut fields = FieldReader::new(payload);
        let message = Self {
            session_id: fields.optional("sessionId"),
            result: fields.raw("result"),
        };
        fields.finish(message)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildSessionStartMessage {
    pub session_id: SessionId,
    /// Upper bound (ms) of a random delay to apply before processing. Any
    /// JSON number, kept as written.
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
    /// Players allowed to send events to the child. Absent means everyone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_sendable_players: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<ContentSize>,
    /// Replay log to start the child from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlog: Option<Value>,
}

impl ChildSessionStartMessage {
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
        }
    }

    /// Read a `child_start` payload. Only a missing or unusable
    /// `sessionId` fails; any other malformed field is dropped.
    pub fn decode_lenient(payload: &Value) -> MessageResult<Decoded<Self>> {
        let mut fields = FieldReader::new(payload);
        let message = Self {
            session_id: fields.session_id(CoeMessageKind::ChildStart)?,
            delay_range: fields.optional("delayRange"),
            application: fields.optional("application"),
            cascade_applications: fields.optional("cascadeApplications"),
            local: fields.optional("local"),
            local_events: fields.optional("localEvents"),
            event_sendable_players: fields.optional("eventSendablePlayers"),
            additional_data: fields.raw("additionalData"),
            size: fields.optional("size"),
            playlog: fields.raw("playlog"),
        };
        Ok(fields.finish(message))
    }
}

/// How a child session ended.
#[derive(Clone, Debug, PartialEq)]
pub enum ChildSessionOutcome {
    Success { result: Option<Value> },
    Failure { error: Value },
}

impl ChildSessionOutcome {
    pub fn success(result: Option<Value>) -> Self {
        Self::Success { result }
    }

    /// Build a failure. The error value must be truthy.
    pub fn failure(error: Value) -> MessageResult<Self> {
        if is_truthy(&error) {
            Ok(Self::Failure { error })
        } else {
            Err(MessageError::FalsyError(error))
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawChildSessionEnd", into = "RawChildSessionEnd")]
pub struct ChildSessionEndMessage {
    pub session_id: SessionId,
    pub outcome: ChildSessionOutcome,
    /// Legacy: ask the plugin to deliver the child's result before exiting.
    pub needs_result: bool,
    /// Legacy: ask the plugin to deliver the child's playlog before exiting.
    pub needs_playlog: bool,
}

impl ChildSessionEndMessage {
    pub fn new(session_id: SessionId, outcome: ChildSessionOutcome) -> Self {
        Self {
            session_id,
            outcome,
            needs_result: false,
            needs_playlog: false,
        }
    }

    /// Read a `child_end` payload. The legacy flags are read for
    /// truthiness, like `error`.
    pub fn decode_lenient(payload: &Value) -> MessageResult<Decoded<Self>> {
        let mut fields = FieldReader::new(payload);
        let session_id = fields.session_id(CoeMessageKind::ChildEnd)?;
        let outcome = match fields.raw("error").filter(is_truthy) {
            Some(error) => ChildSessionOutcome::Failure { error },
            None => ChildSessionOutcome::Success {
                result: fields.raw("result"),
            },
        };
        let message = Self {
            session_id,
            outcome,
            needs_result: fields.flag("needsResult"),
            needs_playlog: fields.flag("needsPlaylog"),
        };
        Ok(fields.finish(message))
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChildSessionEnd {
    session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    needs_result: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    needs_playlog: bool,
}

impl From<RawChildSessionEnd> for ChildSessionEndMessage {
    fn from(raw: RawChildSessionEnd) -> Self {
        let outcome = match raw.error.filter(is_truthy) {
            Some(error) => ChildSessionOutcome::Failure { error },
            None => ChildSessionOutcome::Success { result: raw.result },
        };
        Self {
            session_id: raw.session_id,
            outcome,
            needs_result: raw.needs_result,
            needs_playlog: raw.needs_playlog,
        }
    }
}

impl From<ChildSessionEndMessage> for RawChildSessionEnd {
    fn from(msg: ChildSessionEndMessage) -> Self {
        let (result, error) = match msg.outcome {
            ChildSessionOutcome::Success { result } => (result, None),
            ChildSessionOutcome::Failure { error } => (None, Some(error)),
        };
        Self {
            session_id: msg.session_id,
            result,
            error,
            needs_result: msg.needs_result,
            needs_playlog: msg.needs_playlog,
        }
    }
}

/// Truthiness as the wire contract defines it: null, false, 0, NaN and the
/// empty string are falsy; everything else (including `[]` and `{}`) is
/// truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
