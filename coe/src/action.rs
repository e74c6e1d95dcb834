use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The player an action is attributed to. `id` is absent for events raised
/// without a player (the active instance's own sends, for instance).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Inbound data delivered to the controller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub player: Player,
    #[serde(default)]
    pub data: Value,
}

impl Action {
    pub fn new(player_id: Option<String>, data: Value) -> Self {
        Self {
            player: Player { id: player_id },
            data,
        }
    }

    pub fn player_id(&self) -> Option<&str> {
        self.player.id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn anonymous_player_serializes_empty() {
        let action = Action::new(None, json!({"data": "foo"}));
        assert_eq!(
            serde_json::to_value(&action).unwrap(),
            json!({"player": {}, "data": {"data": "foo"}})
        );
        let named = Action::new(Some(":akashic".into()), json!(1));
        assert_eq!(
            serde_json::to_value(&named).unwrap(),
            json!({"player": {"id": ":akashic"}, "data": 1})
        );
    }
}
