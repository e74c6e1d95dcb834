// Core ID types for the coe message schema.
//
// `SessionId` is an opaque string scoped to one child session. It is created
// by whoever starts the session and referenced by every message about that
// session. It is serialized as a bare string so it drops straight into the
// JSON message shapes in `message.rs` and `external.rs`. Senders sometimes
// use a number instead; decoding accepts that and keeps its decimal text.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Number;

/// Opaque identifier of one (child) session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(Number),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(id) => Self(id),
            Raw::Number(id) => Self(id.to_string()),
        })
    }
}

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
