//! Handler registry keyed by field name or dotted path.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::HandlerError;
use crate::record::MetricRecord;

/// Maps one reconstructed JSON object to zero or more records.
pub trait Handler: Send + Sync {
    fn handle(&self, value: &Value) -> Result<Vec<MetricRecord>, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&Value) -> Result<Vec<MetricRecord>, HandlerError> + Send + Sync,
{
    fn handle(&self, value: &Value) -> Result<Vec<MetricRecord>, HandlerError> {
        self(value)
    }
}

pub type HandlerRef = Arc<dyn Handler>;

/// Immutable mapping from key to handlers, shared across workers.
///
/// Keys are either a bare field name (`web_channel`) or a dotted path from the
/// line's root (`""` for the root object, `data`, `request_data.r.item`).
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Vec<HandlerRef>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// Handlers for `key` in registration order; empty when none are registered.
    pub fn lookup(&self, key: &str) -> &[HandlerRef] {
        self.handlers.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.keys().collect();
        keys.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("keys", &keys)
            .finish()
    }
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, Vec<HandlerRef>>,
}

impl HandlerRegistryBuilder {
    /// Add a handler under `key`. Several handlers may share one key.
    pub fn register(mut self, key: impl Into<String>, handler: impl Handler + 'static) -> Self {
        self.handlers
            .entry(key.into())
            .or_default()
            .push(Arc::new(handler));
        self
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}
