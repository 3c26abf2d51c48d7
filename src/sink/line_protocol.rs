//! InfluxDB line protocol encoding.
//!
//! `measurement[,tag=value...] field=value[,field=value...] timestamp_ns`

use std::fmt::Write;
use tracing::debug;

use crate::record::{MetricRecord, Scalar};

fn escape_into(out: &mut String, value: &str, special: &[char]) {
    for c in value.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c if special.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
}

const MEASUREMENT_SPECIAL: &[char] = &[',', ' '];
const KEY_SPECIAL: &[char] = &[',', '=', ' '];
const STRING_SPECIAL: &[char] = &['"', '\\'];

fn push_field_value(out: &mut String, value: &Scalar) -> bool {
    match value {
        Scalar::String(s) => {
            out.push('"');
            escape_into(out, s, STRING_SPECIAL);
            out.push('"');
        }
        Scalar::Integer(i) => {
            let _ = write!(out, "{i}i");
        }
        Scalar::Float(f) if f.is_finite() => {
            let _ = write!(out, "{f}");
        }
        Scalar::Float(_) => return false,
        Scalar::Boolean(b) => {
            let _ = write!(out, "{b}");
        }
    }
    true
}

/// Append one line for `record`. Returns `false` if the record cannot be
/// expressed (no usable field or a time outside the nanosecond range).
pub fn write_line(out: &mut String, record: &MetricRecord) -> bool {
    let Some(nanos) = record.time.timestamp_nanos_opt() else {
        return false;
    };

    let mut line = String::with_capacity(128);
    escape_into(&mut line, &record.measurement, MEASUREMENT_SPECIAL);

    for (key, value) in &record.tags {
        let value = value.to_string();
        // Empty tag values are not representable.
        if value.is_empty() {
            continue;
        }
        line.push(',');
        escape_into(&mut line, key, KEY_SPECIAL);
        line.push('=');
        escape_into(&mut line, &value, KEY_SPECIAL);
    }

    let mut separator = ' ';
    for (key, value) in &record.fields {
        let mark = line.len();
        line.push(separator);
        escape_into(&mut line, key, KEY_SPECIAL);
        line.push('=');
        if push_field_value(&mut line, value) {
            separator = ',';
        } else {
            line.truncate(mark);
        }
    }
    if separator == ' ' {
        return false;
    }

    let _ = write!(line, " {nanos}");
    out.push_str(&line);
    true
}

/// Encode `records` as newline-separated lines, skipping unrepresentable ones.
pub fn encode(records: &[MetricRecord]) -> String {
    encode_counted(records).0
}

/// Like [`encode`], also returning the number of lines written.
pub fn encode_counted(records: &[MetricRecord]) -> (String, usize) {
    let mut out = String::with_capacity(records.len() * 128);
    let mut lines = 0;
    for record in records {
        let mark = out.len();
        if mark > 0 {
            out.push('\n');
        }
        if write_line(&mut out, record) {
            lines += 1;
        } else {
            out.truncate(mark);
            debug!(
                measurement = %record.measurement,
                "Skipping record without representable fields"
            );
        }
    }
    (out, lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn time() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 2, 14, 10, 26, 22).unwrap()
    }

    #[test]
    fn test_request_info_line() {
        let record = MetricRecord::builder("request-info", time())
            .tag("status", 200i64)
            .tag("host", "rogerthat-server.appspot.com")
            .field("latency", 0.5)
            .field("mcycles", 10i64)
            .build();

        assert_eq!(
            encode(&[record]),
            "request-info,host=rogerthat-server.appspot.com,status=200 latency=0.5,mcycles=10i 1518603982000000000"
        );
    }

    #[test]
    fn test_escaping() {
        let record = MetricRecord::builder("my measurement,x", time())
            .tag("user agent", "Mozilla/5.0 (X11, Linux)")
            .tag("a=b", "c")
            .field("user", "say \"hi\" \\o/")
            .field("ok", true)
            .build();

        assert_eq!(
            encode(&[record]),
            r#"my\ measurement\,x,a\=b=c,user\ agent=Mozilla/5.0\ (X11\,\ Linux) ok=true,user="say \"hi\" \\o/" 1518603982000000000"#
        );
    }

    #[test]
    fn test_skips_records_without_fields() {
        let empty = MetricRecord::builder("rogerthat.flow_member_result", time())
            .tag("tag", "x")
            .build();
        let nan = MetricRecord::builder("m", time())
            .field("v", f64::NAN)
            .build();
        let ok = MetricRecord::builder("m", time()).field("v", 1.0).build();

        assert_eq!(encode(&[empty.clone(), ok.clone(), nan]), "m v=1 1518603982000000000");
        assert_eq!(encode(&[empty]), "");
        assert_eq!(encode(&[ok.clone(), ok]).lines().count(), 2);
    }

    #[test]
    fn test_counts_encoded_lines() {
        let empty = MetricRecord::builder("m", time()).tag("tag", "x").build();
        let ok = MetricRecord::builder("m", time()).field("v", 1i64).build();

        let (body, lines) = encode_counted(&[ok.clone(), empty.clone(), ok]);
        assert_eq!(lines, 2);
        assert_eq!(body.lines().count(), 2);
        assert_eq!(encode_counted(&[empty]), (String::new(), 0));
    }

    #[test]
    fn test_empty_tag_dropped() {
        let record = MetricRecord::builder("m", time())
            .tag("app", "")
            .field("v", 1i64)
            .build();
        assert_eq!(encode(&[record]), "m v=1i 1518603982000000000");
    }
}
