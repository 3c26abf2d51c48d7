//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the pipeline.
//! Events implement the `InternalEvent` trait which records the
//! corresponding Prometheus metric.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

// ============================================================================
// Extraction
// ============================================================================

/// Event emitted when handlers produce records from a file.
pub struct RecordsExtracted {
    pub count: u64,
}

impl InternalEvent for RecordsExtracted {
    fn emit(self) {
        trace!(count = self.count, "Records extracted");
        counter!("flurry_records_extracted_total").increment(self.count);
    }
}

/// Event emitted when a line could not be fully tokenized.
pub struct MalformedLines {
    pub count: u64,
}

impl InternalEvent for MalformedLines {
    fn emit(self) {
        trace!(count = self.count, "Malformed lines");
        counter!("flurry_malformed_lines_total").increment(self.count);
    }
}

/// Event emitted when a handler rejects its object.
pub struct HandlerFailed<'a> {
    pub key: &'a str,
}

impl InternalEvent for HandlerFailed<'_> {
    fn emit(self) {
        trace!(key = self.key, "Handler failed");
        counter!("flurry_handler_errors_total", "key" => self.key.to_string()).increment(1);
    }
}

// ============================================================================
// File lifecycle
// ============================================================================

/// Status of a processed file.
#[derive(Debug, Clone, Copy)]
pub enum FileStatus {
    Success,
    Failed,
}

impl FileStatus {
    fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Success => "success",
            FileStatus::Failed => "failed",
        }
    }
}

/// Event emitted when a file task resolves.
pub struct FileProcessed {
    pub status: FileStatus,
}

impl InternalEvent for FileProcessed {
    fn emit(self) {
        trace!(status = self.status.as_str(), "File processed");
        counter!("flurry_files_processed_total", "status" => self.status.as_str()).increment(1);
    }
}

/// Stage at which a file failure occurred.
#[derive(Debug, Clone, Copy)]
pub enum FailureStage {
    Download,
    Extract,
    Write,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Download => "download",
            FailureStage::Extract => "extract",
            FailureStage::Write => "write",
        }
    }
}

/// Event emitted when a file fails processing.
pub struct FileFailed {
    pub stage: FailureStage,
}

impl InternalEvent for FileFailed {
    fn emit(self) {
        trace!(stage = self.stage.as_str(), "File failed");
        counter!("flurry_files_failed_total", "stage" => self.stage.as_str()).increment(1);
    }
}

/// Event emitted when a file download completes.
pub struct FileDownloadCompleted {
    pub duration: Duration,
}

impl InternalEvent for FileDownloadCompleted {
    fn emit(self) {
        trace!(
            duration_ms = self.duration.as_millis(),
            "File download completed"
        );
        histogram!("flurry_file_download_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Event emitted when the number of running file workers changes.
pub struct ActiveWorkers {
    pub count: usize,
}

impl InternalEvent for ActiveWorkers {
    fn emit(self) {
        trace!(count = self.count, "Active workers");
        gauge!("flurry_active_workers").set(self.count as f64);
    }
}

/// Event emitted after discovery with the number of files awaiting dispatch.
pub struct PendingFiles<'a> {
    pub source: &'a str,
    pub count: usize,
}

impl InternalEvent for PendingFiles<'_> {
    fn emit(self) {
        trace!(source = self.source, count = self.count, "Pending files");
        gauge!("flurry_pending_files", "source" => self.source.to_string()).set(self.count as f64);
    }
}

// ============================================================================
// Sink
// ============================================================================

/// Status of a sink or storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted when a batch write to the metrics database completes.
pub struct SinkWriteCompleted {
    pub records: usize,
    pub status: RequestStatus,
    pub duration: Duration,
}

impl InternalEvent for SinkWriteCompleted {
    fn emit(self) {
        trace!(
            records = self.records,
            status = self.status.as_str(),
            duration_ms = self.duration.as_millis(),
            "Sink write completed"
        );
        counter!("flurry_sink_requests_total", "status" => self.status.as_str()).increment(1);
        histogram!("flurry_sink_write_duration_seconds").record(self.duration.as_secs_f64());
        if matches!(self.status, RequestStatus::Success) {
            counter!("flurry_records_written_total").increment(self.records as u64);
        }
    }
}

/// Event emitted when a chunk is retried after a transient sink failure.
pub struct SinkRetry {
    pub attempt: u32,
    pub batch_size: usize,
}

impl InternalEvent for SinkRetry {
    fn emit(self) {
        trace!(
            attempt = self.attempt,
            batch_size = self.batch_size,
            "Sink retry"
        );
        counter!("flurry_sink_retries_total").increment(1);
    }
}

// ============================================================================
// State
// ============================================================================

/// Event emitted when a source checkpoint is persisted.
pub struct CheckpointSaved<'a> {
    pub source: &'a str,
}

impl InternalEvent for CheckpointSaved<'_> {
    fn emit(self) {
        trace!(source = self.source, "Checkpoint saved");
        counter!("flurry_checkpoint_saved_total", "source" => self.source.to_string())
            .increment(1);
    }
}

/// Event emitted when a source frontier moves to a later hour folder.
pub struct FrontierAdvanced<'a> {
    pub source: &'a str,
}

impl InternalEvent for FrontierAdvanced<'_> {
    fn emit(self) {
        trace!(source = self.source, "Frontier advanced");
        counter!("flurry_frontier_advanced_total", "source" => self.source.to_string())
            .increment(1);
    }
}

// ============================================================================
// Storage operation events
// ============================================================================

/// Storage operation types.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Get,
    Put,
    List,
    Rename,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Put => "put",
            StorageOperation::List => "list",
            StorageOperation::Rename => "rename",
        }
    }
}

/// Event emitted when a storage request completes.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
    pub duration: Duration,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            duration_ms = self.duration.as_millis(),
            "Storage request"
        );
        counter!(
            "flurry_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
        histogram!(
            "flurry_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}

impl RequestStatus {
    /// Status for the outcome of a fallible request.
    pub fn of<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            RequestStatus::Success
        } else {
            RequestStatus::Error
        }
    }
}
