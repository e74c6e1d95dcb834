// Application descriptors carried by session-start messages.

use serde::{Deserialize, Serialize};

/// Identifies the application a session should run.
///
/// A receiver is expected to load `url` when present, and otherwise build
/// the location from `type` and `version`. A missing `version` means the
/// receiver's default (usually the latest).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationIdentifier {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Size the content is expected to be launched at. Absent means the
/// platform default.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSize {
    pub width: u32,
    pub height: u32,
}
