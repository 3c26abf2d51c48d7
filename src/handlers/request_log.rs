//! HTTP request logs (`type: _request`).

use serde_json::Value;

use super::{epoch_at, float_at, int_at, required, scalar_at, str_at};
use crate::error::{HandlerError, InvalidFieldSnafu};
use crate::record::{MetricRecord, Scalar};
use snafu::prelude::*;

pub const MEASUREMENT: &str = "request-info";

/// Path component of a request resource, without query or fragment.
pub fn resource_path(resource: &str) -> &str {
    let resource = resource.split(['?', '#']).next().unwrap_or_default();
    match resource.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("", |slash| &rest[slash..]),
        None => resource,
    }
}

fn required_tag(data: &Value, field: &str) -> Result<Scalar, HandlerError> {
    let raw = required(data, field)?;
    Scalar::from_json(raw).context(InvalidFieldSnafu {
        field,
        expected: "a scalar",
    })
}

pub fn request_info(value: &Value) -> Result<Vec<MetricRecord>, HandlerError> {
    let data = required(value, "data")?;

    let resource = str_at(data, "resource").context(InvalidFieldSnafu {
        field: "resource",
        expected: "a string",
    })?;

    let mut record = MetricRecord::builder(MEASUREMENT, epoch_at(data, "start_time")?)
        .tag_opt("project", scalar_at(data, "app_id"))
        .tag("host", required_tag(data, "host")?)
        .tag("ip", required_tag(data, "ip")?)
        .tag("resource", resource_path(resource))
        .tag("status", required_tag(data, "status")?)
        .tag("user_agent", required_tag(data, "user_agent")?)
        .field("latency", float_at(data, "latency")?)
        .field("status", int_at(data, "status")?)
        .field("mcycles", int_at(data, "mcycles")?)
        .field("pending_time", float_at(data, "pending_time")?)
        .field_opt("response_size", scalar_at(data, "response_size"))
        .field(
            "task_retry_count",
            if data.get("task_retry_count").is_some_and(|v| !v.is_null()) {
                int_at(data, "task_retry_count")?
            } else {
                0
            },
        );

    if str_at(data, "task_name").is_some_and(|name| !name.is_empty()) {
        record = record
            .tag_opt("task_name", scalar_at(data, "task_name"))
            .tag_opt("task_queue_name", scalar_at(data, "task_queue_name"));
    }

    Ok(vec![record.build()])
}
