// coe_messages — message schema for the coe session-coordination layer.
//
// This crate defines the data shapes shared by the coordination core (`coe`),
// the headless engine host (`coe_engine`), and the platform collaborators. It
// has no dependency on either of them.
//
// Module overview:
// - `types.rs`:       `SessionId` newtype.
// - `application.rs`: `ApplicationIdentifier`, `ContentSize`.
// - `message.rs`:     Internal `CoeMessage` union (`start`, `end`,
//                     `child_start`, `child_end`) and `ChildSessionOutcome`.
// - `external.rs`:    Outward-facing `ExternalMessage` envelope.
// - `playlog.rs`:     Raw integer-tagged engine events <-> `PlaylogEvent`.
// - `error.rs`:       `MessageError`.
//
// Design decisions:
// - **JSON everywhere.** Payloads are `serde_json::Value`, matching what the
//   engine carries in message events. Typed views are decoded on demand.
// - **Closed event enum at the boundary.** Raw event codes are decoded once,
//   in `playlog.rs`. Unknown codes survive verbatim so they can pass through
//   untouched.

pub mod application;
pub mod error;
pub mod external;
pub mod message;
pub mod playlog;
pub mod types;

pub use application::{ApplicationIdentifier, ContentSize};
pub use error::{MessageError, MessageResult};
pub use external::ExternalMessage;
pub use message::{
    ChildSessionEndMessage, ChildSessionOutcome, ChildSessionStartMessage, CoeMessage,
    CoeMessageKind, Decoded, SessionEndMessage, SessionStartMessage, is_truthy,
};
pub use playlog::PlaylogEvent;
pub use types::SessionId;

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    #[test]
    fn start_message_is_tagged() {
        let msg = CoeMessage::from_payload(&json!({
            "type": "start",
            "parameters": {"name": "session-parameter"}
        }))
        .unwrap();
        assert_eq!(
            msg,
            CoeMessage::Start(SessionStartMessage {
                parameters: json!({"name": "session-parameter"}),
            })
        );
        assert_eq!(msg.kind(), "start");
    }

    #[test]
    fn foreign_payloads_are_not_coe_messages() {
        assert!(CoeMessage::from_payload(&json!({"name": "broadcast"})).is_none());
        assert!(CoeMessage::from_payload(&json!({"type": "unknown"})).is_none());
        assert!(CoeMessage::from_payload(&json!("start")).is_none());
    }

    #[test]
    fn end_message_omits_missing_result() {
        let msg = CoeMessage::End(SessionEndMessage {
            session_id: Some("0".into()),
            result: None,
        });
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "end", "sessionId": "0"})
        );
    }

    #[test]
    fn child_start_decodes_local_events() {
        let msg = CoeMessage::from_payload(&json!({
            "type": "child_start",
            "sessionId": "child-1",
            "local": true,
            "localEvents": [[32, 0, ":akashic", {"type": "start", "parameters": {}}]],
            "application": {"type": "app-type", "version": "1.0"},
            "delayRange": 100
        }))
        .unwrap();
        let CoeMessage::ChildStart(start) = msg else {
            panic!("expected child_start");
        };
        assert_eq!(start.session_id, SessionId::new("child-1"));
        assert_eq!(start.delay_range, Some(serde_json::Number::from(100u64)));
        assert_eq!(start.application.unwrap().kind, "app-type");
        let events = start.local_events.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].player_id(), Some(":akashic"));
    }

    #[test]
    fn kind_is_read_from_the_tag_alone() {
        assert_eq!(
            CoeMessageKind::of(&json!({"type": "child_start", "sessionId": {}})),
            Some(CoeMessageKind::ChildStart)
        );
        assert_eq!(CoeMessageKind::of(&json!({"type": "end", "result": 1})), Some(CoeMessageKind::End));
        assert_eq!(CoeMessageKind::of(&json!({"type": "unknown"})), None);
        assert_eq!(CoeMessageKind::of(&json!({"type": 3})), None);
        assert_eq!(CoeMessageKind::of(&json!(["start"])), None);
    }

    #[test]
    fn numeric_session_ids_keep_their_text() {
        let id: SessionId = serde_json::from_value(json!(7)).unwrap();
        assert_eq!(id, SessionId::new("7"));
        assert_eq!(serde_json::to_value(&id).unwrap(), json!("7"));
        assert!(serde_json::from_value::<SessionId>(json!({"id": 7})).is_err());
    }

    #[test]
    fn lenient_child_start_keeps_what_decodes() {
        let decoded = ChildSessionStartMessage::decode_lenient(&json!({
            "type": "child_start",
            "sessionId": "c1",
            "delayRange": 12.5,
            "application": {"type": "app"},
            "size": "large",
            "additionalData": {"foo": "bar"}
        }))
        .unwrap();
        let start = decoded.message;
        assert_eq!(start.delay_range, serde_json::Number::from_f64(12.5));
        assert_eq!(start.application.unwrap().version, None);
        assert_eq!(start.size, None);
        assert_eq!(start.additional_data, Some(json!({"foo": "bar"})));
        assert_eq!(decoded.rejected, vec!["size"]);

        assert!(matches!(
            ChildSessionStartMessage::decode_lenient(&json!({"type": "child_start"})),
            Err(MessageError::MissingSessionId("child_start"))
        ));
    }

    #[test]
    fn lenient_child_end_reads_flags_for_truthiness() {
        let decoded = ChildSessionEndMessage::decode_lenient(&json!({
            "type": "child_end",
            "sessionId": 7,
            "needsResult": 1,
            "error": ""
        }))
        .unwrap();
        assert!(decoded.rejected.is_empty());
        let end = decoded.message;
        assert_eq!(end.session_id, SessionId::new("7"));
        assert!(end.needs_result);
        assert!(!end.needs_playlog);
        assert_eq!(end.outcome, ChildSessionOutcome::success(None));
    }

    #[test]
    fn lenient_end_drops_a_malformed_session_id_only() {
        let decoded = SessionEndMessage::decode_lenient(&json!({
            "type": "end",
            "sessionId": [1],
            "result": {"score": 1}
        }));
        assert_eq!(decoded.message.session_id, None);
        assert_eq!(decoded.message.result, Some(json!({"score": 1})));
        assert_eq!(decoded.rejected, vec!["sessionId"]);
    }

    #[test]
    fn child_end_truthy_error_is_failure() {
        let msg = CoeMessage::from_payload(&json!({
            "type": "child_end",
            "sessionId": "child-1",
            "error": "timeout"
        }))
        .unwrap();
        let CoeMessage::ChildEnd(end) = msg else {
            panic!("expected child_end");
        };
        assert_eq!(
            end.outcome,
            ChildSessionOutcome::Failure {
                error: json!("timeout")
            }
        );
    }

    #[test]
    fn child_end_falsy_error_is_success() {
        for falsy in [json!(""), json!(0), json!(false), Value::Null] {
            let msg = CoeMessage::from_payload(&json!({
                "type": "child_end",
                "sessionId": "child-1",
                "result": {"score": 1},
                "error": falsy
            }))
            .unwrap();
            let CoeMessage::ChildEnd(end) = msg else {
                panic!("expected child_end");
            };
            assert_eq!(
                end.outcome,
                ChildSessionOutcome::success(Some(json!({"score": 1})))
            );
        }
    }

    #[test]
    fn child_end_failure_requires_truthy_error() {
        assert!(matches!(
            ChildSessionOutcome::failure(json!("")),
            Err(MessageError::FalsyError(_))
        ));
        assert!(ChildSessionOutcome::failure(json!({"code": 1})).unwrap().is_failure());
    }

    #[test]
    fn child_end_encodes_legacy_flags_only_when_set() {
        let mut end = ChildSessionEndMessage::new(
            "child-1".into(),
            ChildSessionOutcome::failure(json!("boom")).unwrap(),
        );
        assert_eq!(
            serde_json::to_value(CoeMessage::ChildEnd(end.clone())).unwrap(),
            json!({"type": "child_end", "sessionId": "child-1", "error": "boom"})
        );
        end.needs_playlog = true;
        let value = serde_json::to_value(CoeMessage::ChildEnd(end)).unwrap();
        assert_eq!(value["needsPlaylog"], json!(true));
        assert!(value.get("needsResult").is_none());
    }

    #[test]
    fn external_end_with_and_without_result() {
        let with = ExternalMessage::end("0".into(), Some(json!({"score": 200})));
        assert_eq!(
            serde_json::to_value(&with).unwrap(),
            json!({"type": "end", "sessionId": "0", "data": {"result": {"score": 200}}})
        );
        let without = ExternalMessage::end("0".into(), None);
        assert_eq!(
            serde_json::to_value(&without).unwrap(),
            json!({"type": "end", "sessionId": "0"})
        );
    }

    #[test]
    fn external_message_optional_envelope_fields() {
        let msg = ExternalMessage::function_end("s".into(), None)
            .with_target("parent")
            .with_id(7);
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "function_end", "target": "parent", "id": 7, "sessionId": "s"})
        );
    }

    #[test]
    fn truthiness_matches_wire_contract() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(0.0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!("0")));
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!({})));
        assert!(is_truthy(&json!(-1)));
    }
}
