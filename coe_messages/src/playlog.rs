// Raw playlog event codec.
//
// The engine moves events around as small JSON arrays whose first element is
// an integer type code: `[code, priority, playerId, ...payload]`. This module
// decodes those arrays into the closed `PlaylogEvent` enum at the boundary,
// so nothing past this point ever matches on magic integers.
//
// Only the four codes the coordination layer reasons about get their own
// variants (join, leave, timestamp, message). Every other code (point
// events, operations, player info, ...) decodes into `Other` and re-encodes
// to exactly the array it came from, so foreign events pass through the
// filter untouched.
//
// Serde goes through `try_from = "Vec<Value>"` / `into = "Vec<Value>"`, which
// keeps the wire form identical to the engine's playlog while the Rust side
// only sees the enum.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MessageError, MessageResult};

/// Raw event type codes used by the engine's playlog.
pub mod codes {
    pub const JOIN: u8 = 0x00;
    pub const LEAVE: u8 = 0x01;
    pub const TIMESTAMP: u8 = 0x02;
    pub const PLAYER_INFO: u8 = 0x03;
    pub const MESSAGE: u8 = 0x20;
    pub const POINT_DOWN: u8 = 0x21;
    pub const POINT_MOVE: u8 = 0x22;
    pub const POINT_UP: u8 = 0x23;
    pub const OPERATION: u8 = 0x40;
}

/// A decoded engine event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Value>", into = "Vec<Value>")]
pub enum PlaylogEvent {
    /// A player joined the play.
    Join {
        priority: i32,
        player_id: String,
        name: Option<String>,
    },
    /// A player left the play.
    Leave { priority: i32, player_id: String },
    /// Timing anchor, in milliseconds of game time.
    Timestamp {
        priority: i32,
        player_id: Option<String>,
        timestamp: u64,
    },
    /// Arbitrary application data, optionally attributed to a player.
    Message {
        priority: i32,
        player_id: Option<String>,
        data: Value,
    },
    /// Any other event, kept verbatim (`fields` excludes the code).
    Other { code: u8, fields: Vec<Value> },
}

impl PlaylogEvent {
    pub fn message(priority: i32, player_id: Option<String>, data: Value) -> Self {
        Self::Message {
            priority,
            player_id,
            data,
        }
    }

    /// A timestamp with no player attribution.
    pub fn timestamp(timestamp: u64) -> Self {
        Self::Timestamp {
            priority: 0,
            player_id: None,
            timestamp,
        }
    }

    pub fn join(player_id: impl Into<String>, name: Option<String>) -> Self {
        Self::Join {
            priority: 0,
            player_id: player_id.into(),
            name,
        }
    }

    pub fn leave(player_id: impl Into<String>) -> Self {
        Self::Leave {
            priority: 0,
            player_id: player_id.into(),
        }
    }

    /// The raw type code this event encodes to.
    pub fn code(&self) -> u8 {
        match self {
            Self::Join { .. } => codes::JOIN,
            Self::Leave { .. } => codes::LEAVE,
            Self::Timestamp { .. } => codes::TIMESTAMP,
            Self::Message { .. } => codes::MESSAGE,
            Self::Other { code, .. } => *code,
        }
    }

    pub fn player_id(&self) -> Option<&str> {
        match self {
            Self::Join { player_id, .. } | Self::Leave { player_id, .. } => Some(player_id),
            Self::Timestamp { player_id, .. } | Self::Message { player_id, .. } => {
                player_id.as_deref()
            }
            Self::Other { fields, .. } => fields.get(1).and_then(Value::as_str),
        }
    }
}

impl TryFrom<Vec<Value>> for PlaylogEvent {
    type Error = MessageError;

    fn try_from(raw: Vec<Value>) -> MessageResult<Self> {
        let mut fields = raw.into_iter();
        let code_value = fields.next().ok_or(MessageError::EmptyPlaylogEvent)?;
        let code = code_value
            .as_u64()
            .and_then(|c| u8::try_from(c).ok())
            .ok_or(MessageError::InvalidEventCode(code_value))?;
        let rest: Vec<Value> = fields.collect();

        match code {
            codes::JOIN => Ok(Self::Join {
                priority: priority_field(code, &rest)?,
                player_id: required_player(code, &rest)?,
                name: optional_string(code, &rest, 2, "name")?,
            }),
            codes::LEAVE => Ok(Self::Leave {
                priority: priority_field(code, &rest)?,
                player_id: required_player(code, &rest)?,
            }),
            codes::TIMESTAMP => {
                let value = rest.get(2).ok_or(MessageError::MissingField {
                    code,
                    index: 3,
                    name: "timestamp",
                })?;
                // Fractional milliseconds are truncated, matching how
                // timestamps are produced.
                let timestamp = value
                    .as_u64()
                    .or_else(|| value.as_f64().filter(|t| *t >= 0.0).map(|t| t as u64))
                    .ok_or_else(|| MessageError::MalformedField {
                        code,
                        name: "timestamp",
                        value: value.clone(),
                    })?;
                Ok(Self::Timestamp {
                    priority: priority_field(code, &rest)?,
                    player_id: optional_string(code, &rest, 1, "playerId")?,
                    timestamp,
                })
            }
            codes::MESSAGE => Ok(Self::Message {
                priority: priority_field(code, &rest)?,
                player_id: optional_string(code, &rest, 1, "playerId")?,
                data: rest.get(2).cloned().unwrap_or(Value::Null),
            }),
            _ => Ok(Self::Other { code, fields: rest }),
        }
    }
}

impl From<PlaylogEvent> for Vec<Value> {
    fn from(event: PlaylogEvent) -> Self {
        let code = Value::from(event.code());
        match event {
            PlaylogEvent::Join {
                priority,
                player_id,
                name,
            } => {
                let mut raw = vec![code, priority.into(), player_id.into()];
                if let Some(name) = name {
                    raw.push(name.into());
                }
                raw
            }
            PlaylogEvent::Leave {
                priority,
                player_id,
            } => vec![code, priority.into(), player_id.into()],
            PlaylogEvent::Timestamp {
                priority,
                player_id,
                timestamp,
            } => vec![code, priority.into(), player_id.into(), timestamp.into()],
            PlaylogEvent::Message {
                priority,
                player_id,
                data,
            } => vec![code, priority.into(), player_id.into(), data],
            PlaylogEvent::Other { fields, .. } => {
                let mut raw = Vec::with_capacity(fields.len() + 1);
                raw.push(code);
                raw.extend(fields);
                raw
            }
        }
    }
}

/// Priority sits right after the code; absent or null means 0.
fn priority_field(code: u8, rest: &[Value]) -> MessageResult<i32> {
    match rest.first() {
        None | Some(Value::Null) => Ok(0),
        Some(value) => value
            .as_i64()
            .and_then(|p| i32::try_from(p).ok())
            .ok_or_else(|| MessageError::MalformedField {
                code,
                name: "priority",
                value: value.clone(),
            }),
    }
}

fn required_player(code: u8, rest: &[Value]) -> MessageResult<String> {
    optional_string(code, rest, 1, "playerId")?.ok_or(MessageError::MissingField {
        code,
        index: 2,
        name: "playerId",
    })
}

fn optional_string(
    code: u8,
    rest: &[Value],
    index: usize,
    name: &'static str,
) -> MessageResult<Option<String>> {
    match rest.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(MessageError::MalformedField {
            code,
            name,
            value: other.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn decode(raw: Value) -> PlaylogEvent {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn decodes_trusted_message() {
        let event = decode(json!([32, 0, ":akashic", {"type": "start"}]));
        assert_eq!(
            event,
            PlaylogEvent::Message {
                priority: 0,
                player_id: Some(":akashic".into()),
                data: json!({"type": "start"}),
            }
        );
        assert_eq!(event.player_id(), Some(":akashic"));
    }

    #[test]
    fn message_without_player_or_priority() {
        let event = decode(json!([32, null, null, "hi"]));
        assert_eq!(event, PlaylogEvent::message(0, None, json!("hi")));
        assert_eq!(event.player_id(), None);
    }

    #[test]
    fn join_and_leave() {
        assert_eq!(
            decode(json!([0, 0, "p1", "Alice"])),
            PlaylogEvent::join("p1", Some("Alice".into()))
        );
        assert_eq!(decode(json!([1, 0, "p1"])), PlaylogEvent::leave("p1"));
    }

    #[test]
    fn join_requires_player() {
        let err = PlaylogEvent::try_from(vec![json!(0), json!(0), Value::Null]).unwrap_err();
        assert!(matches!(err, MessageError::MissingField { code: 0, .. }));
    }

    #[test]
    fn timestamp_truncates_fractional_milliseconds() {
        let event = decode(json!([2, 0, null, 1234.9]));
        assert_eq!(event, PlaylogEvent::timestamp(1234));
    }

    #[test]
    fn unknown_codes_pass_through_verbatim() {
        let raw = json!([33, 1, "p2", 7, 10, 20, null]);
        let event = decode(raw.clone());
        assert!(matches!(event, PlaylogEvent::Other { code: 33, .. }));
        assert_eq!(event.player_id(), Some("p2"));
        assert_eq!(serde_json::to_value(&event).unwrap(), raw);
    }

    #[test]
    fn encodes_message_as_raw_array() {
        let event = PlaylogEvent::message(2, None, json!({"data": "foo"}));
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!([32, 2, null, {"data": "foo"}])
        );
    }

    #[test]
    fn rejects_empty_and_non_integer_codes() {
        assert!(matches!(
            PlaylogEvent::try_from(Vec::new()),
            Err(MessageError::EmptyPlaylogEvent)
        ));
        assert!(matches!(
            PlaylogEvent::try_from(vec![json!("join")]),
            Err(MessageError::InvalidEventCode(_))
        ));
    }
}
