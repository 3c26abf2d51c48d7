//! flurry: turns hourly JSON application logs into time-series metrics.
//!
//! Log files land in hour folders (`YYYY-MM-DD HH:00:00/`) of an object
//! store. flurry discovers new files per source, extracts metric records from
//! each line in a single streaming pass, and writes them in batches to
//! InfluxDB. Completed files are tracked in a crash-safe checkpoint so no file
//! is processed twice across restarts.
//!
//! # Example
//!
//! ```ignore
//! use flurry::{Config, RunOptions, run_pipeline};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), flurry::error::PipelineError> {
//!     let config = Config::from_file("config.yaml").expect("valid config");
//!     let stats = run_pipeline(config, RunOptions::default(), CancellationToken::new()).await?;
//!     println!("Wrote {} records", stats.records_written);
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod metrics;
pub mod pipeline;
pub mod record;
pub mod sink;
pub mod source;
pub mod storage;

// Re-export main types
pub use config::Config;
pub use extract::{Extraction, Extractor, HandlerRegistry};
pub use pipeline::{Pipeline, PipelineStats, RunOptions, run_pipeline};
pub use record::{MetricRecord, Scalar};
pub use storage::{StorageProvider, StorageProviderRef};
