//! Batching writer with narrowed retries.
//!
//! Records are buffered per file and flushed in chunks of at most
//! `max_batch_size`, so N records take `ceil(N / max_batch_size)` write
//! calls when nothing fails. A chunk that fails transiently is retried with
//! smaller sub-batches after an exponential backoff.

use std::time::{Duration, Instant};
use tracing::{error, warn};

use super::MetricSinkRef;
use crate::config::SinkConfig;
use crate::emit;
use crate::error::SinkError;
use crate::metrics::events::{RequestStatus, SinkRetry, SinkWriteCompleted};
use crate::record::MetricRecord;

/// Factor by which each retry shrinks the sub-batch size.
pub const RETRY_BATCH_DIVISOR: usize = 5;

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub max_batch_size: usize,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
}

impl From<&SinkConfig> for WriterConfig {
    fn from(config: &SinkConfig) -> Self {
        Self {
            max_batch_size: config.max_batch_size.max(1),
            retry_attempts: config.retry_attempts,
            retry_backoff: config.retry_backoff(),
        }
    }
}

/// Totals for one writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub records: usize,
    pub write_calls: usize,
    pub retries: usize,
}

/// Buffers the records of one file and writes them in bounded batches.
pub struct SinkWriter {
    sink: MetricSinkRef,
    config: WriterConfig,
    buffer: Vec<MetricRecord>,
    summary: WriteSummary,
}

impl SinkWriter {
    pub fn new(sink: MetricSinkRef, config: WriterConfig) -> Self {
        let capacity = config.max_batch_size.min(16 * 1024);
        Self {
            sink,
            config,
            buffer: Vec::with_capacity(capacity),
            summary: WriteSummary::default(),
        }
    }

    /// Buffer a record, writing a full batch once the buffer reaches the maximum.
    pub async fn push(&mut self, record: MetricRecord) -> Result<(), SinkError> {
        self.buffer.push(record);
        if self.buffer.len() >= self.config.max_batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn extend(
        &mut self,
        records: impl IntoIterator<Item = MetricRecord>,
    ) -> Result<(), SinkError> {
        for record in records {
            self.push(record).await?;
        }
        Ok(())
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Write everything buffered.
    pub async fn flush(&mut self) -> Result<(), SinkError> {
        let pending = std::mem::take(&mut self.buffer);
        for chunk in pending.chunks(self.config.max_batch_size) {
            self.write_chunk(chunk).await?;
        }
        Ok(())
    }

    /// Flush the remainder. The file may only be marked complete after this succeeds.
    pub async fn finish(mut self) -> Result<WriteSummary, SinkError> {
        self.flush().await?;
        Ok(self.summary)
    }

    async fn write_chunk(&mut self, chunk: &[MetricRecord]) -> Result<(), SinkError> {
        let err = match self.write(chunk).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if !err.is_transient() || self.config.retry_attempts == 0 {
            return Err(self.give_up(err, chunk.len()));
        }

        let mut last_error = err;
        let mut written = 0;
        let mut batch_size = chunk.len();
        let mut backoff = self.config.retry_backoff;

        for attempt in 1..=self.config.retry_attempts {
            batch_size = (batch_size / RETRY_BATCH_DIVISOR).max(1);
            self.summary.retries += 1;
            emit!(SinkRetry {
                attempt,
                batch_size,
            });
            warn!(
                attempt,
                batch_size,
                remaining = chunk.len() - written,
                error = %last_error,
                "Retrying sink write with smaller batches"
            );
            tokio::time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2);

            match self.write_from(chunk, &mut written, batch_size).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => last_error = e,
                Err(e) => return Err(self.give_up(e, chunk.len() - written)),
            }
        }
        Err(self.give_up(last_error, chunk.len() - written))
    }

    /// Write `chunk[*written..]` in sub-batches, advancing `written` as each lands.
    async fn write_from(
        &mut self,
        chunk: &[MetricRecord],
        written: &mut usize,
        batch_size: usize,
    ) -> Result<(), SinkError> {
        while *written < chunk.len() {
            let end = (*written + batch_size).min(chunk.len());
            self.write(&chunk[*written..end]).await?;
            *written = end;
        }
        Ok(())
    }

    async fn write(&mut self, batch: &[MetricRecord]) -> Result<(), SinkError> {
        let start = Instant::now();
        let result = self.sink.write_batch(batch).await;
        emit!(SinkWriteCompleted {
            records: *result.as_ref().unwrap_or(&0),
            status: RequestStatus::of(&result),
            duration: start.elapsed(),
        });
        self.summary.write_calls += 1;
        let accepted = result?;
        self.summary.records += accepted;
        Ok(())
    }

    fn give_up(&self, err: SinkError, records: usize) -> SinkError {
        if err.is_transient() {
            warn!(records, error = %err, "Sink write failed after retries");
        } else {
            error!(records, error = ?err, "Sink rejected write");
        }
        err
    }
}
