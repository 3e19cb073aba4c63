//! Phoenix channel frames as spoken by Supabase Realtime (`vsn=1.0.0`, JSON
//! object encoding).

use change_feed::{ChangeKind, ChannelSpec, RawChange};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_POSTGRES_CHANGES: &str = "postgres_changes";
pub const EVENT_SYSTEM: &str = "system";
pub const PHOENIX_TOPIC: &str = "phoenix";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyStatus {
    Ok,
    Error(String),
}

pub fn channel_topic(spec: &ChannelSpec) -> String {
    format!("realtime:{}", spec.name)
}

pub fn join_frame(spec: &ChannelSpec, reference: &str, access_token: Option<&str>) -> Frame {
    let mut change = json!({
        "event": "*",
        "schema": spec.schema,
        "table": spec.table,
    });
    if let Some(filter) = &spec.filter {
        change["filter"] = json!(filter);
    }
    let mut payload = json!({
        "config": {
            "broadcast": { "ack": false, "self": false },
            "presence": { "key": "" },
            "postgres_changes": [change],
            "private": false,
        }
    });
    if let Some(token) = access_token {
        payload["access_token"] = json!(token);
    }
    Frame {
        topic: channel_topic(spec),
        event: EVENT_JOIN.into(),
        payload,
        reference: Some(reference.into()),
        join_ref: Some(reference.into()),
    }
}

pub fn leave_frame(spec: &ChannelSpec, reference: &str, join_ref: &str) -> Frame {
    Frame {
        topic: channel_topic(spec),
        event: EVENT_LEAVE.into(),
        payload: json!({}),
        reference: Some(reference.into()),
        join_ref: Some(join_ref.into()),
    }
}

pub fn heartbeat_frame(reference: &str) -> Frame {
    Frame {
        topic: PHOENIX_TOPIC.into(),
        event: EVENT_HEARTBEAT.into(),
        payload: json!({}),
        reference: Some(reference.into()),
        join_ref: None,
    }
}

/// Status carried by a `phx_reply` or `system` payload.
pub fn reply_status(payload: &Value) -> Option<ReplyStatus> {
    let status = payload.get("status")?.as_str()?;
    if status == "ok" {
        return Some(ReplyStatus::Ok);
    }
    let reason = payload
        .get("response")
        .and_then(|response| response.get("reason"))
        .or_else(|| payload.get("message"))
        .and_then(Value::as_str)
        .unwrap_or(status)
        .to_string();
    Some(ReplyStatus::Error(reason))
}

/// Decodes the payload of a `postgres_changes` frame:
/// `{"data": {"type": "INSERT", "record": {..}, "old_record": {..}}}`.
pub fn decode_change(payload: &Value) -> Option<RawChange> {
    let data = payload.get("data")?;
    let kind: ChangeKind = serde_json::from_value(data.get("type")?.clone()).ok()?;
    Some(RawChange {
        kind,
        new: data.get("record").cloned(),
        old: data.get("old_record").cloned(),
    })
}

/// Monotonic `ref` generator, one per socket.
#[derive(Debug, Default)]
pub struct RefCounter(u64);

impl RefCounter {
    pub fn next(&mut self) -> String {
        self.0 = self.0.saturating_add(1);
        self.0.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_frame_carries_filtered_postgres_changes_config() {
        let spec = ChannelSpec::table("thread_T1", "public", "messages").with_filter("thread_id=eq.T1");
        let frame = join_frame(&spec, "1", Some("jwt"));
        let encoded = serde_json::to_value(&frame).expect("encode");

        assert_eq!(encoded["topic"], "realtime:thread_T1");
        assert_eq!(encoded["event"], "phx_join");
        assert_eq!(encoded["ref"], "1");
        assert_eq!(encoded["join_ref"], "1");
        assert_eq!(encoded["payload"]["access_token"], "jwt");
        let change = &encoded["payload"]["config"]["postgres_changes"][0];
        assert_eq!(change["event"], "*");
        assert_eq!(change["table"], "messages");
        assert_eq!(change["filter"], "thread_id=eq.T1");
    }

    #[test]
    fn decodes_insert_payload_from_server() {
        let raw = r#"{
            "topic": "realtime:messages",
            "event": "postgres_changes",
            "payload": {
                "ids": [7],
                "data": {
                    "schema": "public",
                    "table": "messages",
                    "commit_timestamp": "2024-03-01T10:00:00Z",
                    "type": "INSERT",
                    "record": {"id": "m1", "thread_id": "T1", "content": "hola"},
                    "columns": [],
                    "errors": null
                }
            },
            "ref": null
        }"#;
        let frame: Frame = serde_json::from_str(raw).expect("frame");
        assert_eq!(frame.reference, None);
        let change = decode_change(&frame.payload).expect("change");
        assert_eq!(change.kind, ChangeKind::Insert);
        assert_eq!(change.new.expect("record")["content"], "hola");
        assert!(change.old.is_none());
    }

    #[test]
    fn unknown_change_type_is_not_decoded() {
        let payload = json!({"data": {"type": "TRUNCATE", "record": {}}});
        assert!(decode_change(&payload).is_none());
    }

    #[test]
    fn reply_status_surfaces_error_reason() {
        let ok = json!({"status": "ok", "response": {"postgres_changes": []}});
        assert_eq!(reply_status(&ok), Some(ReplyStatus::Ok));

        let denied = json!({"status": "error", "response": {"reason": "Unauthorized"}});
        assert_eq!(
            reply_status(&denied),
            Some(ReplyStatus::Error("Unauthorized".into()))
        );

        let system = json!({"status": "error", "message": "invalid filter", "extension": "postgres_changes"});
        assert_eq!(
            reply_status(&system),
            Some(ReplyStatus::Error("invalid filter".into()))
        );
    }
}
