use thiserror::Error;

/// Errors raised while building or decoding schema values.
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("playlog event is empty")]
    EmptyPlaylogEvent,

    #[error("playlog event code is not an integer: {0}")]
    InvalidEventCode(serde_json::Value),

    #[error("playlog event {code} is missing field #{index} ({name})")]
    MissingField {
        code: u8,
        index: usize,
        name: &'static str,
    },

    #[error("playlog event {code} has a malformed {name} field: {value}")]
    MalformedField {
        code: u8,
        name: &'static str,
        value: serde_json::Value,
    },

    #[error("{0} message has no usable sessionId")]
    MissingSessionId(&'static str),

    #[error("child session error value must be truthy, got {0}")]
    FalsyError(serde_json::Value),
}

pub type MessageResult<T> = Result<T, MessageError>;
