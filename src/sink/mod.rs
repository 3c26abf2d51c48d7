//! Metric sinks.
//!
//! The pipeline writes through [`SinkWriter`], which batches and retries on
//! top of any [`MetricSink`]. Production uses [`InfluxSink`].

pub mod influx;
pub mod line_protocol;
pub mod writer;

pub use influx::InfluxSink;
pub use writer::{SinkWriter, WriteSummary, WriterConfig};

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::SinkError;
use crate::record::MetricRecord;

/// A time-series database accepting batches of records.
#[async_trait]
pub trait MetricSink: Send + Sync {
    /// Write one batch and return how many of its records were stored.
    ///
    /// Callers keep batches within their configured maximum. Records the sink
    /// cannot represent are skipped and not counted.
    async fn write_batch(&self, records: &[MetricRecord]) -> Result<usize, SinkError>;
}

pub type MetricSinkRef = Arc<dyn MetricSink>;
