//! Our City App statistics.

use serde_json::Value;

use super::{epoch_at, required, scalar_at};
use crate::error::{HandlerError, InvalidFieldSnafu};
use crate::record::{MetricRecord, Scalar};
use snafu::prelude::*;

pub const ACTIVE_MODULES: &str = "oca.active_modules";
pub const CUSTOM_LOYALTY_CARDS: &str = "oca.custom_loyalty_cards";

/// One record per (app, module) in `request_data: {app: {module: amount}}`.
pub fn active_modules(value: &Value) -> Result<Vec<MetricRecord>, HandlerError> {
    let Some(apps) = value.get("request_data").and_then(Value::as_object) else {
        return Ok(Vec::new());
    };
    let time = epoch_at(value, "timestamp")?;

    let mut records = Vec::new();
    for (app, modules) in apps {
        let Some(modules) = modules.as_object() else {
            continue;
        };
        for (module, amount) in modules {
            let Some(amount) = Scalar::from_json(amount) else {
                continue;
            };
            records.push(
                MetricRecord::builder(ACTIVE_MODULES, time)
                    .tag("module", module.as_str())
                    .tag("app", app.as_str())
                    .field("amount", amount)
                    .build(),
            );
        }
    }
    Ok(records)
}

/// One record per entry of `request_data: [{country, app_id, amount}]`.
pub fn custom_loyalty_cards(value: &Value) -> Result<Vec<MetricRecord>, HandlerError> {
    let Some(stats) = value.get("request_data").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    let time = epoch_at(value, "timestamp")?;

    stats
        .iter()
        .map(|entry| -> Result<MetricRecord, HandlerError> {
            Ok(MetricRecord::builder(CUSTOM_LOYALTY_CARDS, time)
                .tag("country", required_scalar(entry, "country")?)
                .tag("app", required_scalar(entry, "app_id")?)
                .field("amount", required_scalar(entry, "amount")?)
                .build())
        })
        .collect()
}

fn required_scalar(entry: &Value, field: &str) -> Result<Scalar, HandlerError> {
    required(entry, field)?;
    scalar_at(entry, field).context(InvalidFieldSnafu {
        field,
        expected: "a scalar",
    })
}
