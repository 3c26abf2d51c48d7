//! Rogerthat server logs: callbacks, API calls, app syncs, and web channel events.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use super::{epoch_at, scalar_at, str_at};
use crate::error::HandlerError;
use crate::record::MetricRecord;

pub const FLOW_MEMBER_RESULT: &str = "rogerthat.flow_member_result";
pub const CALLBACK_API: &str = "rogerthat.callback_api";
pub const API_CALLS: &str = "rogerthat.api_calls";
pub const MESSAGES: &str = "rogerthat.messages";
pub const WEB_CHANNEL: &str = "rogerthat.web_channel";

const UNKNOWN: &str = "unknown";

static HUMAN_READABLE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)\s*\{.*\}").expect("constant tag pattern"));

/// Readable form of a message tag.
///
/// JSON tags carry their name under `__rt__.tag`; other tags may have a JSON
/// suffix that is stripped.
pub fn human_readable_tag(tag: &str) -> Option<String> {
    if tag.is_empty() {
        return None;
    }

    if tag.starts_with('{') && tag.ends_with('}') {
        return match serde_json::from_str::<Value>(tag) {
            Ok(parsed) => match parsed.get("__rt__.tag") {
                None => Some(tag.to_string()),
                Some(Value::Null) => None,
                Some(Value::String(name)) => Some(name.clone()),
                Some(other) => Some(other.to_string()),
            },
            Err(_) => Some(tag.to_string()),
        };
    }

    match HUMAN_READABLE_TAG.captures(tag) {
        Some(caps) => Some(caps[1].to_string()),
        None => Some(tag.to_string()),
    }
}

/// `user_details` is either one object or a list whose first entry counts.
fn user_details(params: &Value) -> Option<&Value> {
    let details = params.get("user_details")?;
    match details {
        Value::Array(entries) => entries.first(),
        Value::Object(map) if !map.is_empty() => Some(details),
        _ => None,
    }
}

pub fn callback_api(value: &Value) -> Result<Vec<MetricRecord>, HandlerError> {
    let request_data = value.get("request_data").unwrap_or(&Value::Null);
    let function = str_at(value, "function")
        .filter(|f| !f.is_empty())
        .or_else(|| str_at(request_data, "method"));
    let params = request_data.get("params").unwrap_or(&Value::Null);

    let Some(tag) = str_at(params, "tag").and_then(human_readable_tag) else {
        return Ok(Vec::new());
    };
    if tag.starts_with('{') {
        return Ok(Vec::new());
    }

    let details = user_details(params);
    let app = details
        .and_then(|d| str_at(d, "app_id"))
        .unwrap_or(UNKNOWN);
    let user = details.and_then(|d| str_at(d, "email")).unwrap_or(UNKNOWN);
    let time = epoch_at(value, "timestamp")?;

    let record = if function == Some("messaging.flow_member_result") {
        let last_step = params
            .get("steps")
            .and_then(Value::as_array)
            .and_then(|steps| steps.last());
        MetricRecord::builder(FLOW_MEMBER_RESULT, time)
            .tag_opt("method", scalar_at(request_data, "method"))
            .tag("tag", tag)
            .tag_opt("flush_id", scalar_at(params, "flush_id"))
            .tag_opt("end_id", scalar_at(params, "end_id"))
            .tag("app", app)
            .tag_opt("service", scalar_at(value, "user"))
            .field_opt("parent_message_key", scalar_at(params, "parent_message_key"))
            .field_opt("last_step_id", last_step.and_then(|s| scalar_at(s, "step_id")))
            .build()
    } else {
        MetricRecord::builder(CALLBACK_API, time)
            .tag("tag", tag)
            .tag("app", app)
            .tag_opt("method", scalar_at(params, "method"))
            .tag_opt("service", scalar_at(value, "user"))
            .field("user", user)
            .build()
    };
    Ok(vec![record])
}

pub fn api(value: &Value) -> Result<Vec<MetricRecord>, HandlerError> {
    let record = MetricRecord::builder(API_CALLS, epoch_at(value, "timestamp")?)
        .tag_opt("method", scalar_at(value, "function"))
        .field_opt("success", scalar_at(value, "success"))
        .field_opt("service", scalar_at(value, "user"))
        .build();
    Ok(vec![record])
}

/// Split `hash:app` into user and app.
fn split_user(user: &str) -> (&str, &str) {
    match user.split_once(':') {
        Some((user, app)) => (user, app),
        None if user.is_empty() => (UNKNOWN, UNKNOWN),
        None => (user, "rogerthat"),
    }
}

/// A response entry acknowledging receipt of a message.
fn is_received_ack(entry: &Value) -> bool {
    let response = entry
        .get("r")
        .or_else(|| entry.get("item").and_then(|item| item.get("r")));
    match response.and_then(Value::as_object) {
        Some(map) => map.len() == 1 && map.contains_key("received_timestamp"),
        None => false,
    }
}

pub fn app(value: &Value) -> Result<Vec<MetricRecord>, HandlerError> {
    let entries = value
        .get("request_data")
        .and_then(|request| request.get("r"))
        .and_then(Value::as_array);
    let Some(entries) = entries else {
        return Ok(Vec::new());
    };

    let acks = entries.iter().filter(|entry| is_received_ack(entry)).count();
    if acks == 0 {
        return Ok(Vec::new());
    }

    let (user, app) = split_user(str_at(value, "user").unwrap_or(UNKNOWN));
    let time = epoch_at(value, "timestamp")?;
    let record = MetricRecord::builder(MESSAGES, time)
        .tag("app", app)
        .field("user", user)
        .build();
    Ok(vec![record; acks])
}

/// Nested `web_channel` event. Events without their own timestamp are ignored.
pub fn web_channel(value: &Value) -> Result<Vec<MetricRecord>, HandlerError> {
    if value.get("timestamp").is_none_or(Value::is_null) {
        return Ok(Vec::new());
    }

    let record = MetricRecord::builder(WEB_CHANNEL, epoch_at(value, "timestamp")?)
        .tag("app", str_at(value, "app_id").unwrap_or(UNKNOWN))
        .tag("event", str_at(value, "type").unwrap_or(UNKNOWN))
        .field("user", str_at(value, "user").unwrap_or(UNKNOWN))
        .build();
    Ok(vec![record])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Scalar;
    use serde_json::json;

    #[test]
    fn test_human_readable_tag() {
        assert_eq!(human_readable_tag(""), None);
        assert_eq!(
            human_readable_tag(r#"{"__rt__.tag": "order", "id": 5}"#).as_deref(),
            Some("order")
        );
        assert_eq!(
            human_readable_tag(r#"{"id": 5}"#).as_deref(),
            Some(r#"{"id": 5}"#)
        );
        assert_eq!(
            human_readable_tag("{not json}").as_deref(),
            Some("{not json}")
        );
        assert_eq!(
            human_readable_tag(r#"loyalty_scan {"points": 5}"#).as_deref(),
            Some("loyalty_scan")
        );
        assert_eq!(human_readable_tag("plain").as_deref(), Some("plain"));
    }

    fn callback(function: &str, tag: &str) -> Value {
        json!({
            "type": "callback_api",
            "function": function,
            "timestamp": 1518603982,
            "user": "service-hash",
            "request_data": {
                "method": "messaging.poke",
                "params": {
                    "tag": tag,
                    "method": "messaging.poke",
                    "flush_id": "flush-1",
                    "end_id": "end-1",
                    "parent_message_key": "parent-key",
                    "steps": [{"step_id": "first"}, {"step_id": "last"}],
                    "user_details": [{"app_id": "em-be-idola", "email": "john@example.com"}]
                }
            }
        })
    }

    #[test]
    fn test_callback_api() {
        let records = callback_api(&callback("", "scan {\"x\": 1}")).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.measurement, CALLBACK_API);
        assert_eq!(record.tags["tag"], Scalar::from("scan"));
        assert_eq!(record.tags["app"], Scalar::from("em-be-idola"));
        assert_eq!(record.tags["method"], Scalar::from("messaging.poke"));
        assert_eq!(record.tags["service"], Scalar::from("service-hash"));
        assert_eq!(record.fields["user"], Scalar::from("john@example.com"));
    }

    #[test]
    fn test_flow_member_result() {
        let records = callback_api(&callback("messaging.flow_member_result", "survey")).unwrap();
        let record = &records[0];
        assert_eq!(record.measurement, FLOW_MEMBER_RESULT);
        assert_eq!(record.tags["flush_id"], Scalar::from("flush-1"));
        assert_eq!(record.tags["end_id"], Scalar::from("end-1"));
        assert_eq!(record.fields["last_step_id"], Scalar::from("last"));
        assert_eq!(record.fields["parent_message_key"], Scalar::from("parent-key"));
    }

    #[test]
    fn test_callback_without_usable_tag() {
        assert!(callback_api(&callback("", "")).unwrap().is_empty());
        assert!(callback_api(&callback("", r#"{"id": 5}"#)).unwrap().is_empty());

        let mut no_tag = callback("", "x");
        no_tag["request_data"]["params"]
            .as_object_mut()
            .unwrap()
            .remove("tag");
        assert!(callback_api(&no_tag).unwrap().is_empty());
    }

    #[test]
    fn test_callback_unknown_user() {
        let mut value = callback("", "tagged");
        value["request_data"]["params"]["user_details"] = json!({});
        let record = &callback_api(&value).unwrap()[0];
        assert_eq!(record.tags["app"], Scalar::from("unknown"));
        assert_eq!(record.fields["user"], Scalar::from("unknown"));
    }

    #[test]
    fn test_api() {
        let records = api(&json!({
            "type": "api",
            "function": "system.get_identity",
            "success": true,
            "user": "5c31adac01cad92a435c44f514798d88",
            "timestamp": 1518583750
        }))
        .unwrap();
        let record = &records[0];
        assert_eq!(record.measurement, API_CALLS);
        assert_eq!(record.tags["method"], Scalar::from("system.get_identity"));
        assert_eq!(record.fields["success"], Scalar::Boolean(true));
        assert_eq!(
            record.fields["service"],
            Scalar::from("5c31adac01cad92a435c44f514798d88")
        );
    }

    #[test]
    fn test_app_counts_received_acks() {
        let value = json!({
            "type": "app",
            "timestamp": 1518603982,
            "user": "c356f0adc203397a9d89ff9e1a6e6b54:em-be-idola",
            "request_data": {
                "r": [
                    {"s": "success", "r": {"received_timestamp": 1518603981}},
                    {"item": {"r": {"received_timestamp": 1518603981}}},
                    {"s": "success", "r": {"received_timestamp": 1, "other": 2}},
                    {"s": "success", "r": null}
                ]
            }
        });
        let records = app(&value).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tags["app"], Scalar::from("em-be-idola"));
        assert_eq!(
            records[0].fields["user"],
            Scalar::from("c356f0adc203397a9d89ff9e1a6e6b54")
        );
    }

    #[test]
    fn test_app_without_entries() {
        assert!(app(&json!({"type": "app", "request_data": {"r": []}})).unwrap().is_empty());
        assert!(app(&json!({"type": "app"})).unwrap().is_empty());
    }

    #[test]
    fn test_split_user() {
        assert_eq!(split_user("hash:app:x"), ("hash", "app:x"));
        assert_eq!(split_user("hash"), ("hash", "rogerthat"));
        assert_eq!(split_user(""), ("unknown", "unknown"));
    }

    #[test]
    fn test_web_channel() {
        let records = web_channel(&json!({
            "app_id": "em-be-idola",
            "type": "connect",
            "user": "john@example.com",
            "timestamp": 1518603982
        }))
        .unwrap();
        assert_eq!(records[0].measurement, WEB_CHANNEL);
        assert_eq!(records[0].tags["event"], Scalar::from("connect"));

        assert!(web_channel(&json!({"type": "connect"})).unwrap().is_empty());
    }
}
