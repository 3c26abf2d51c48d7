//! Error types for flurry using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the codebase.

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error"))]
    Io { source: std::io::Error },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error"))]
    S3Config { source: object_store::Error },

    /// GCS configuration error.
    #[snafu(display("GCS configuration error"))]
    GcsConfig { source: object_store::Error },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// No source configured.
    #[snafu(display("At least one source must be configured"))]
    NoSources,

    /// Source path is empty.
    #[snafu(display("Source '{name}' has an empty path"))]
    EmptySourcePath { name: String },

    /// Sink URL is empty.
    #[snafu(display("Sink url cannot be empty"))]
    EmptySinkUrl,

    /// Sink database is empty.
    #[snafu(display("Sink database cannot be empty"))]
    EmptySinkDatabase,

    /// Batch size of zero.
    #[snafu(display("Sink max_batch_size must be at least 1"))]
    InvalidBatchSize,

    /// Worker pool of zero.
    #[snafu(display("Processing max_concurrent_files must be at least 1"))]
    InvalidConcurrency,

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Extraction Errors ============

/// Errors raised by the JSON tokenizer on malformed or truncated input.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum TokenizeError {
    /// Input ended while a value or container was still open.
    #[snafu(display("Unexpected end of input at byte {offset}"))]
    UnexpectedEof { offset: usize },

    /// A byte that cannot start or continue the expected token.
    #[snafu(display("Unexpected character {found:?} at byte {offset}"))]
    UnexpectedCharacter { found: char, offset: usize },

    /// Malformed escape sequence inside a string.
    #[snafu(display("Invalid escape sequence at byte {offset}"))]
    InvalidEscape { offset: usize },

    /// Malformed number literal.
    #[snafu(display("Invalid number at byte {offset}"))]
    InvalidNumber { offset: usize },

    /// String content that is not valid UTF-8.
    #[snafu(display("Invalid UTF-8 in string at byte {offset}"))]
    InvalidUtf8 { offset: usize },

    /// Non-whitespace content after the root value closed.
    #[snafu(display("Trailing characters after JSON value at byte {offset}"))]
    TrailingCharacters { offset: usize },
}

/// Errors raised by a handler while mapping a reconstructed object.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum HandlerError {
    /// A required field is absent.
    #[snafu(display("Missing field '{field}'"))]
    MissingField { field: String },

    /// A field is present but has the wrong shape.
    #[snafu(display("Field '{field}' is not {expected}"))]
    InvalidField {
        field: String,
        expected: &'static str,
    },

    /// A timestamp that cannot be represented.
    #[snafu(display("Timestamp {value} is out of range"))]
    InvalidTimestamp { value: f64 },
}

/// Errors surfaced while extracting records from one line.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ExtractError {
    /// The line stopped tokenizing; records already produced are kept.
    #[snafu(display("Line is malformed"))]
    Tokenize { source: TokenizeError },

    /// A handler failed on its object.
    #[snafu(display("Handler for '{key}' failed"))]
    Handler { key: String, source: HandlerError },
}

// ============ Source Errors ============

/// A folder name that is not an hour boundary in `YYYY-MM-DD HH:00:00` form.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub), display("Invalid hour folder name: {name:?}"))]
pub struct HourFolderError {
    pub name: String,
}

// ============ Checkpoint Errors ============

/// Errors that can occur while loading or saving processing state.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CheckpointError {
    /// Reading or writing the checkpoint failed.
    #[snafu(display("Checkpoint storage error"))]
    CheckpointStorage { source: StorageError },

    /// The persisted checkpoint exists but cannot be parsed.
    #[snafu(display("Checkpoint at {path} is corrupted"))]
    CheckpointParse {
        path: String,
        source: serde_json::Error,
    },

    /// State could not be serialized.
    #[snafu(display("Failed to serialize checkpoint"))]
    CheckpointSerialize { source: serde_json::Error },
}

// ============ Sink Errors ============

/// Errors that can occur when writing to the metrics database.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// Failed to build the HTTP client.
    #[snafu(display("Failed to build sink HTTP client"))]
    ClientBuild { source: reqwest::Error },

    /// The request did not complete.
    #[snafu(display("Sink request failed"))]
    HttpRequest { source: reqwest::Error },

    /// The database answered with a non-success status.
    #[snafu(display("Sink returned HTTP {status}: {body}"))]
    HttpStatus { status: u16, body: String },
}

impl SinkError {
    /// Whether retrying the same write may succeed (timeouts, overload, 5xx).
    pub fn is_transient(&self) -> bool {
        match self {
            SinkError::ClientBuild { .. } => false,
            SinkError::HttpRequest { source } => source.is_timeout() || source.is_connect(),
            SinkError::HttpStatus { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
        }
    }
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ File Task Errors ============

/// Errors that fail a single file task. The file is retried on a later cycle.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FileError {
    /// Downloading the file failed.
    #[snafu(display("Failed to download {path}"))]
    Download { path: String, source: StorageError },

    /// Writing records from the file failed.
    #[snafu(display("Failed to write records from {path}"))]
    Write { path: String, source: SinkError },

    /// The blocking extraction task panicked or was cancelled.
    #[snafu(display("Extraction task for {path} did not complete"))]
    ExtractTask {
        path: String,
        source: tokio::task::JoinError,
    },
}

// ============ Pipeline Error (top-level) ============

/// Top-level pipeline errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Storage error.
    #[snafu(display("Storage error"))]
    PipelineStorage { source: StorageError },

    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Loading processing state failed.
    #[snafu(display("Failed to load state for source '{name}'"))]
    StateLoad {
        name: String,
        source: CheckpointError,
    },

    /// Completion state could not be persisted after retrying.
    #[snafu(display("Failed to persist state for source '{name}' after {attempts} attempts"))]
    StatePersist {
        name: String,
        attempts: u32,
        source: CheckpointError,
    },

    /// Sink construction error.
    #[snafu(display("Sink error"))]
    PipelineSink { source: SinkError },

    /// Address parsing error.
    #[snafu(display("Failed to parse address"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },
}
