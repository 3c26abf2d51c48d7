//! Per-file worker: download, extract line by line, write in batches.
//!
//! Extraction is CPU bound and runs on the blocking pool. Records travel to
//! the async writer in chunks over a bounded channel, so a large file is never
//! held in memory as records and lines keep their order.

use bytes::Bytes;
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::emit;
use crate::error::{DownloadSnafu, ExtractError, ExtractTaskSnafu, FileError, WriteSnafu};
use crate::extract::Extractor;
use crate::metrics::events::{
    FailureStage, FileDownloadCompleted, HandlerFailed, MalformedLines, RecordsExtracted,
};
use crate::record::MetricRecord;
use crate::sink::{MetricSinkRef, SinkWriter, WriteSummary, WriterConfig};
use crate::source::FileDescriptor;
use crate::storage::StorageProviderRef;

/// Chunks buffered between the extraction thread and the writer.
const CHUNK_QUEUE_DEPTH: usize = 4;

/// Shared by every worker.
#[derive(Clone)]
pub(super) struct WorkerContext {
    pub extractor: Arc<Extractor>,
    pub sink: MetricSinkRef,
    pub writer_config: WriterConfig,
}

/// What a worker reports back to the control loop.
pub(super) struct FileOutcome {
    pub file: FileDescriptor,
    pub result: Result<FileSummary, FileError>,
}

#[derive(Debug, Clone, Copy, Default)]
pub(super) struct ExtractStats {
    pub lines: usize,
    pub records: usize,
    pub malformed_lines: usize,
    pub handler_errors: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub(super) struct FileSummary {
    pub extract: ExtractStats,
    pub write: WriteSummary,
}

impl FileError {
    pub(super) fn stage(&self) -> FailureStage {
        match self {
            FileError::Download { .. } => FailureStage::Download,
            FileError::Write { .. } => FailureStage::Write,
            FileError::ExtractTask { .. } => FailureStage::Extract,
        }
    }
}

/// Process one file end to end.
///
/// Returns only after every record has been written, so success means the
/// file may be marked complete.
pub(super) async fn process_file(
    file: &FileDescriptor,
    storage: StorageProviderRef,
    ctx: WorkerContext,
) -> Result<FileSummary, FileError> {
    let start = Instant::now();
    let data = storage
        .get(file.path.as_str())
        .await
        .context(DownloadSnafu { path: &file.path })?;
    emit!(FileDownloadCompleted {
        duration: start.elapsed(),
    });
    debug!(
        source = %file.source,
        path = %file.path,
        bytes = data.len(),
        "Downloaded file"
    );

    let chunk_size = ctx.writer_config.max_batch_size.max(1);
    let (tx, mut rx) = mpsc::channel::<Vec<MetricRecord>>(CHUNK_QUEUE_DEPTH);

    let extractor = ctx.extractor.clone();
    let path = file.path.clone();
    let extraction =
        tokio::task::spawn_blocking(move || extract_lines(&extractor, &data, &path, chunk_size, tx));

    let mut writer = SinkWriter::new(ctx.sink, ctx.writer_config);
    while let Some(chunk) = rx.recv().await {
        // Dropping the receiver on error stops the extraction thread at its next send.
        writer
            .extend(chunk)
            .await
            .context(WriteSnafu { path: &file.path })?;
    }
    let write = writer
        .finish()
        .await
        .context(WriteSnafu { path: &file.path })?;

    let extract = extraction
        .await
        .context(ExtractTaskSnafu { path: &file.path })?;

    Ok(FileSummary { extract, write })
}

/// Extract every line of `data` in order, sending records in chunks.
fn extract_lines(
    extractor: &Extractor,
    data: &Bytes,
    path: &str,
    chunk_size: usize,
    tx: mpsc::Sender<Vec<MetricRecord>>,
) -> ExtractStats {
    let mut stats = ExtractStats::default();
    let mut chunk = Vec::with_capacity(chunk_size.min(4096));

    for (index, line) in data.split(|&b| b == b'\n').enumerate() {
        stats.lines += 1;
        let mut extraction = extractor.extract(line);
        for record in extraction.by_ref() {
            stats.records += 1;
            chunk.push(record);
            if chunk.len() >= chunk_size {
                let full = std::mem::replace(&mut chunk, Vec::with_capacity(chunk_size.min(4096)));
                if tx.blocking_send(full).is_err() {
                    return stats;
                }
            }
        }

        let line_number = index + 1;
        for error in extraction.take_errors() {
            match &error {
                ExtractError::Tokenize { .. } => {
                    stats.malformed_lines += 1;
                    warn!(
                        path = %path,
                        line = line_number,
                        error = %snafu::Report::from_error(&error),
                        "Malformed line"
                    );
                }
                ExtractError::Handler { key, .. } => {
                    stats.handler_errors += 1;
                    emit!(HandlerFailed { key });
                    debug!(
                        path = %path,
                        line = line_number,
                        error = %snafu::Report::from_error(&error),
                        "Handler rejected object"
                    );
                }
            }
        }
    }

    if !chunk.is_empty() {
        let _ = tx.blocking_send(chunk);
    }

    emit!(RecordsExtracted {
        count: stats.records as u64,
    });
    if stats.malformed_lines > 0 {
        emit!(MalformedLines {
            count: stats.malformed_lines as u64,
        });
    }
    stats
}
