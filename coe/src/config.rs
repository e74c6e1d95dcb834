// Launch configuration.
//
// A served deployment hands every instance its permissions through the game
// launch arguments:
//
//   {"coe": {"permission": {"advance": true, ...}, "roles": [...], "debugMode": false}}
//
// Everything is optional. Missing flags read as false. Arguments without a
// `coe` object mean "not served": the context then infers permissions from
// the instance's role instead (see `context.rs`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoeResult;

/// What an instance is allowed to do in the session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    /// May advance the session.
    #[serde(default)]
    pub advance: bool,
    /// May aggregate results. Normally held together with `advance`.
    #[serde(default)]
    pub aggregation: bool,
    /// May ask the advancing instance to advance. Normally the launcher's.
    #[serde(default)]
    pub advance_request: bool,
}

impl Permission {
    pub fn all() -> Self {
        Self {
            advance: true,
            aggregation: true,
            advance_request: true,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoeArguments {
    #[serde(default)]
    pub permission: Permission,
    #[serde(default)]
    pub roles: Option<Vec<String>>,
    #[serde(default)]
    pub debug_mode: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InitializeArguments {
    #[serde(default)]
    pub coe: Option<CoeArguments>,
}

impl InitializeArguments {
    /// Read the coe section out of the game's launch arguments. Anything
    /// that is not a JSON object carries no coe configuration.
    pub fn from_args(args: Option<&Value>) -> CoeResult<Self> {
        match args {
            Some(value @ Value::Object(_)) => Ok(serde_json::from_value(value.clone())?),
            _ => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn served_arguments() {
        let args = InitializeArguments::from_args(Some(&json!({
            "coe": {
                "permission": {"advance": true, "advanceRequest": true},
                "roles": ["broadcaster", "audience"],
                "debugMode": true
            },
            "other": 1
        })))
        .unwrap();
        let coe = args.coe.unwrap();
        assert_eq!(
            coe.permission,
            Permission {
                advance: true,
                aggregation: false,
                advance_request: true
            }
        );
        assert_eq!(coe.roles.unwrap(), vec!["broadcaster", "audience"]);
        assert_eq!(coe.debug_mode, Some(true));
    }

    #[test]
    fn missing_sections_default() {
        assert_eq!(
            InitializeArguments::from_args(None).unwrap(),
            InitializeArguments::default()
        );
        assert_eq!(
            InitializeArguments::from_args(Some(&json!("launch"))).unwrap(),
            InitializeArguments::default()
        );
        let empty = InitializeArguments::from_args(Some(&json!({"coe": {}}))).unwrap();
        assert_eq!(empty.coe.unwrap().permission, Permission::none());
    }

    #[test]
    fn malformed_coe_section_is_an_error() {
        assert!(InitializeArguments::from_args(Some(&json!({"coe": {"roles": 3}}))).is_err());
    }
}
