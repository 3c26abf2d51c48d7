//! Routes a line's root object to the handler for its `type`.

use serde_json::Value;
use tracing::debug;

use super::{oca, request_log, rogerthat, str_at};
use crate::error::HandlerError;
use crate::record::MetricRecord;

type HandlerFn = fn(&Value) -> Result<Vec<MetricRecord>, HandlerError>;

fn handler_for(log_type: &str) -> Option<HandlerFn> {
    let handler: HandlerFn = match log_type {
        "_request" => request_log::request_info,
        "callback_api" => rogerthat::callback_api,
        "api" => rogerthat::api,
        "app" => rogerthat::app,
        "oca.active_modules" => oca::active_modules,
        "oca.custom_loyalty_cards" => oca::custom_loyalty_cards,
        _ => return None,
    };
    Some(handler)
}

/// Guess the type of an entry that lacks one.
///
/// `params` marks a callback and `a` an app sync, either on the entry itself
/// or inside its `request_data`.
pub fn infer_type(value: &Value) -> Option<&'static str> {
    let has = |key: &str| {
        value.get(key).is_some()
            || value
                .get("request_data")
                .is_some_and(|request| request.get(key).is_some())
    };
    if has("params") {
        Some("callback_api")
    } else if has("a") {
        Some("app")
    } else {
        None
    }
}

/// Handler registered for the root object of every line.
pub fn process_log(value: &Value) -> Result<Vec<MetricRecord>, HandlerError> {
    let log_type = match str_at(value, "type") {
        Some(log_type) => log_type,
        None => match infer_type(value) {
            Some(inferred) => inferred,
            None => {
                debug!("Dropping log entry without a recognizable type");
                return Ok(Vec::new());
            }
        },
    };

    match handler_for(log_type) {
        Some(handler) => handler(value),
        None => {
            debug!(log_type, "Dropping log entry of unhandled type");
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_infer_type() {
        assert_eq!(infer_type(&json!({"params": {}})), Some("callback_api"));
        assert_eq!(
            infer_type(&json!({"request_data": {"params": {}}})),
            Some("callback_api")
        );
        assert_eq!(infer_type(&json!({"request_data": {"a": []}})), Some("app"));
        assert_eq!(infer_type(&json!({"a": []})), Some("app"));
        assert_eq!(infer_type(&json!({"request_data": {}})), None);
    }

    #[test]
    fn test_unknown_types_are_dropped() {
        assert!(process_log(&json!({"type": "channel", "timestamp": 1})).unwrap().is_empty());
        assert!(process_log(&json!({"timestamp": 1})).unwrap().is_empty());
        assert!(process_log(&json!({})).unwrap().is_empty());
    }

    #[test]
    fn test_dispatches_api() {
        let records = process_log(&json!({
            "type": "api",
            "function": "system.get_identity",
            "success": true,
            "timestamp": 1518583750
        }))
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].measurement, "rogerthat.api_calls");
    }

    #[test]
    fn test_inferred_app_without_type() {
        let records = process_log(&json!({
            "timestamp": 1518603982,
            "user": "c356f0adc203397a9d89ff9e1a6e6b54:em-be-idola",
            "request_data": {
                "a": ["68443b87"],
                "r": [{"s": "success", "r": {"received_timestamp": 1518603981}}]
            }
        }))
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].measurement, "rogerthat.messages");
    }
}
