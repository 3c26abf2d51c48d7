//! Log-type handlers and the registry the pipeline runs with.
//!
//! Handlers are pure: they read one reconstructed object and return records.

pub mod dispatch;
pub mod oca;
pub mod request_log;
pub mod rogerthat;

use chrono::{DateTime, Utc};
use serde_json::Value;
use snafu::prelude::*;

use crate::error::{HandlerError, InvalidFieldSnafu, InvalidTimestampSnafu, MissingFieldSnafu};
use crate::extract::HandlerRegistry;
use crate::record::Scalar;

/// Registry key for the root object of every line.
pub const ROOT: &str = "";

/// Registry key for nested web channel events.
pub const WEB_CHANNEL: &str = "web_channel";

/// Handlers for the production log formats.
pub fn default_registry() -> HandlerRegistry {
    HandlerRegistry::builder()
        .register(ROOT, dispatch::process_log)
        .register(WEB_CHANNEL, rogerthat::web_channel)
        .build()
}

/// A member that must be present and not null.
pub(crate) fn required<'a>(value: &'a Value, field: &str) -> Result<&'a Value, HandlerError> {
    match value.get(field) {
        Some(Value::Null) | None => MissingFieldSnafu { field }.fail(),
        Some(v) => Ok(v),
    }
}

pub(crate) fn str_at<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get(field).and_then(Value::as_str)
}

/// A scalar member as a tag or field value.
pub(crate) fn scalar_at(value: &Value, field: &str) -> Option<Scalar> {
    value.get(field).and_then(Scalar::from_json)
}

/// Integer member, truncating floats and parsing numeric strings.
pub(crate) fn int_at(value: &Value, field: &str) -> Result<i64, HandlerError> {
    let raw = required(value, field)?;
    let parsed = match raw {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    };
    parsed.context(InvalidFieldSnafu {
        field,
        expected: "an integer",
    })
}

/// Float member, parsing numeric strings.
pub(crate) fn float_at(value: &Value, field: &str) -> Result<f64, HandlerError> {
    let raw = required(value, field)?;
    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.context(InvalidFieldSnafu {
        field,
        expected: "a number",
    })
}

/// Epoch seconds (integer or fractional) as a UTC time.
pub(crate) fn epoch_at(value: &Value, field: &str) -> Result<DateTime<Utc>, HandlerError> {
    let raw = required(value, field)?;
    if let Some(secs) = raw.as_i64() {
        return DateTime::from_timestamp(secs, 0).context(InvalidTimestampSnafu { value: secs as f64 });
    }
    let secs = raw.as_f64().context(InvalidFieldSnafu {
        field,
        expected: "epoch seconds",
    })?;
    ensure!(secs.is_finite(), InvalidTimestampSnafu { value: secs });
    let whole = secs.floor();
    let nanos = (((secs - whole) * 1e9).round() as u32).min(999_999_999);
    DateTime::from_timestamp(whole as i64, nanos).context(InvalidTimestampSnafu { value: secs })
}
