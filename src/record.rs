//! Metric records produced by handlers and consumed by the sink.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A tag or field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl Scalar {
    /// Convert a JSON scalar. Null, arrays, and objects have no scalar form.
    pub fn from_json(value: &Value) -> Option<Scalar> {
        match value {
            Value::String(s) => Some(Scalar::String(s.clone())),
            Value::Bool(b) => Some(Scalar::Boolean(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(Scalar::Integer)
                .or_else(|| n.as_f64().map(Scalar::Float)),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::String(s) => f.write_str(s),
            Scalar::Integer(i) => write!(f, "{i}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Boolean(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::String(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::String(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Integer(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Boolean(value)
    }
}

/// One time-series point.
///
/// Immutable once built; tags and fields are kept sorted by key.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub measurement: String,
    pub tags: BTreeMap<String, Scalar>,
    pub fields: BTreeMap<String, Scalar>,
    pub time: DateTime<Utc>,
}

impl MetricRecord {
    /// Start building a record for `measurement` at `time`.
    pub fn builder(measurement: impl Into<String>, time: DateTime<Utc>) -> MetricRecordBuilder {
        MetricRecordBuilder {
            record: MetricRecord {
                measurement: measurement.into(),
                tags: BTreeMap::new(),
                fields: BTreeMap::new(),
                time,
            },
        }
    }
}

/// Builder for [`MetricRecord`]. `None` values are skipped.
#[derive(Debug)]
pub struct MetricRecordBuilder {
    record: MetricRecord,
}

impl MetricRecordBuilder {
    pub fn tag(mut self, key: &str, value: impl Into<Scalar>) -> Self {
        self.record.tags.insert(key.to_string(), value.into());
        self
    }

    pub fn tag_opt(self, key: &str, value: Option<impl Into<Scalar>>) -> Self {
        match value {
            Some(value) => self.tag(key, value),
            None => self,
        }
    }

    pub fn field(mut self, key: &str, value: impl Into<Scalar>) -> Self {
        self.record.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn field_opt(self, key: &str, value: Option<impl Into<Scalar>>) -> Self {
        match value {
            Some(value) => self.field(key, value),
            None => self,
        }
    }

    pub fn build(self) -> MetricRecord {
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_scalar_from_json() {
        assert_eq!(Scalar::from_json(&json!(200)), Some(Scalar::Integer(200)));
        assert_eq!(Scalar::from_json(&json!(0.5)), Some(Scalar::Float(0.5)));
        assert_eq!(Scalar::from_json(&json!("x")), Some(Scalar::from("x")));
        assert_eq!(Scalar::from_json(&json!(true)), Some(Scalar::Boolean(true)));
        assert_eq!(Scalar::from_json(&json!(null)), None);
        assert_eq!(Scalar::from_json(&json!({"a": 1})), None);
    }

    #[test]
    fn test_builder_skips_missing_values() {
        let time = Utc.with_ymd_and_hms(2018, 2, 14, 10, 26, 22).unwrap();
        let record = MetricRecord::builder("rogerthat.callback_api", time)
            .tag("app", "em-be-idola")
            .tag_opt("service", None::<String>)
            .field_opt("user", Some("john@example.com"))
            .build();

        assert_eq!(record.tags.len(), 1);
        assert_eq!(record.fields["user"], Scalar::from("john@example.com"));
        assert_eq!(record.time, time);
    }
}
