//! Processing orchestrator.
//!
//! One control loop owns every source's [`DiscoveryManager`], the in-flight
//! set and a bounded set of worker tasks. Each worker owns one file from
//! download to the last batch write and reports a [`tasks::FileOutcome`].
//!
//! # Poll cycle
//!
//! 1. Collect outcomes of finished workers.
//! 2. Mark successful files complete and persist every changed checkpoint.
//! 3. Only then clear the in-flight markers of the resolved files.
//! 4. Discover pending files per source and dispatch up to the concurrency limit.
//!
//! A crash between a successful write and step 2 causes a harmless
//! reprocessing of that file. Completions are never lost once persisted.

mod signal;
mod tasks;

pub use signal::{cancel_on_signal, shutdown_signal};

use indexmap::IndexMap;
use snafu::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointManager;
use crate::config::Config;
use crate::emit;
use crate::error::{
    PipelineError, PipelineSinkSnafu, PipelineStorageSnafu, StateLoadSnafu, StatePersistSnafu,
};
use crate::extract::Extractor;
use crate::handlers::default_registry;
use crate::metrics::events::{ActiveWorkers, FileFailed, FileProcessed, FileStatus};
use crate::sink::{InfluxSink, MetricSinkRef, WriterConfig};
use crate::source::{DiscoveryManager, FileDescriptor};
use crate::storage::{StorageProvider, StorageProviderRef};

use tasks::{FileOutcome, WorkerContext, process_file};

/// Initial delay between attempts to persist state.
const PERSIST_BACKOFF: Duration = Duration::from_millis(200);

/// Statistics about the pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub files_processed: usize,
    pub files_failed: usize,
    pub lines: usize,
    pub records_written: usize,
    pub malformed_lines: usize,
    pub handler_errors: usize,
}

/// How the control loop runs files.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Process one file at a time inside the control loop instead of on workers.
    pub inline: bool,
}

/// A configured source and its discovery state.
struct Source {
    storage: StorageProviderRef,
    discovery: DiscoveryManager,
}

type FileKey = (String, String);

/// Main processing pipeline.
pub struct Pipeline {
    sources: IndexMap<String, Source>,
    ctx: WorkerContext,
    max_concurrent: usize,
    poll_interval: Duration,
    persist_attempts: u32,
    options: RunOptions,
    in_flight: HashSet<FileKey>,
    /// Files that failed since the last poll tick; held back until the next one.
    cooling: HashSet<FileKey>,
    workers: JoinSet<FileOutcome>,
    /// Worker task ids, to release the file of a worker that panicked.
    worker_files: HashMap<tokio::task::Id, FileDescriptor>,
    /// Outcomes waiting to be committed.
    resolved: Vec<FileOutcome>,
    stats: PipelineStats,
    shutdown: CancellationToken,
}

impl Pipeline {
    /// Create a pipeline and load every source's persisted state.
    pub async fn new(
        config: Config,
        sink: MetricSinkRef,
        shutdown: CancellationToken,
    ) -> Result<Self, PipelineError> {
        let state_storage = Arc::new(
            StorageProvider::for_url_with_options(
                &config.state.path,
                config.state.storage_options.clone(),
            )
            .await
            .context(PipelineStorageSnafu)?,
        );

        let mut sources = IndexMap::with_capacity(config.sources.len());
        for (name, source_config) in &config.sources {
            let storage = Arc::new(
                StorageProvider::for_url_with_options(
                    &source_config.path,
                    source_config.storage_options.clone(),
                )
                .await
                .context(PipelineStorageSnafu)?,
            );
            let checkpoint = CheckpointManager::new(state_storage.clone(), name);
            let mut discovery = DiscoveryManager::new(name, storage.clone(), checkpoint);
            discovery.init().await.context(StateLoadSnafu { name })?;
            info!(source = %name, url = storage.canonical_url(), "Registered source");
            sources.insert(name.clone(), Source { storage, discovery });
        }

        let ctx = WorkerContext {
            extractor: Arc::new(Extractor::new(Arc::new(default_registry()))),
            sink,
            writer_config: WriterConfig::from(&config.sink),
        };

        Ok(Self {
            sources,
            ctx,
            max_concurrent: config.processing.max_concurrent_files.max(1),
            poll_interval: config.processing.poll_interval(),
            persist_attempts: config.processing.persist_attempts.max(1),
            options: RunOptions::default(),
            in_flight: HashSet::new(),
            cooling: HashSet::new(),
            workers: JoinSet::new(),
            worker_files: HashMap::new(),
            resolved: Vec::new(),
            stats: PipelineStats::default(),
            shutdown,
        })
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Number of files dispatched and not yet committed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Run poll cycles until shutdown, then let running workers finish.
    pub async fn run(&mut self) -> Result<PipelineStats, PipelineError> {
        info!(
            sources = self.sources.len(),
            max_concurrent = self.max_concurrent,
            poll_interval_secs = self.poll_interval.as_secs(),
            inline = self.options.inline,
            "Starting pipeline"
        );

        let mut next_poll = Instant::now() + self.poll_interval;
        loop {
            if Instant::now() >= next_poll {
                self.cooling.clear();
                next_poll = Instant::now() + self.poll_interval;
            }
            self.collect_finished();
            self.commit().await?;

            if self.shutdown.is_cancelled() {
                info!("Shutdown requested, stopping dispatch");
                break;
            }

            let dispatched = self.dispatch().await;
            if dispatched > 0 {
                continue;
            }

            debug!(
                in_flight = self.in_flight.len(),
                "Nothing dispatched, waiting for workers or the next poll"
            );
            let has_workers = !self.workers.is_empty();
            tokio::select! {
                _ = self.shutdown.cancelled() => {}
                Some(joined) = self.workers.join_next_with_id(), if has_workers => {
                    self.on_joined(joined);
                }
                _ = tokio::time::sleep_until(next_poll) => {}
            }
        }

        self.drain().await?;
        info!(stats = ?self.stats, "Pipeline stopped");
        Ok(self.stats.clone())
    }

    /// Run a single poll cycle and wait for the files it dispatched.
    ///
    /// Returns the number of files dispatched. Files that failed earlier are
    /// eligible again.
    pub async fn run_once(&mut self) -> Result<usize, PipelineError> {
        self.cooling.clear();
        self.collect_finished();
        self.commit().await?;
        let dispatched = self.dispatch().await;
        self.drain().await?;
        Ok(dispatched)
    }

    /// Wait for every running worker and commit all outcomes.
    async fn drain(&mut self) -> Result<(), PipelineError> {
        if !self.workers.is_empty() {
            info!(workers = self.workers.len(), "Waiting for running workers");
        }
        while let Some(joined) = self.workers.join_next_with_id().await {
            self.on_joined(joined);
        }
        self.commit().await
    }

    fn collect_finished(&mut self) {
        while let Some(joined) = self.workers.try_join_next_with_id() {
            self.on_joined(joined);
        }
    }

    fn on_joined(&mut self, joined: Result<(tokio::task::Id, FileOutcome), JoinError>) {
        match joined {
            Ok((id, outcome)) => {
                self.worker_files.remove(&id);
                self.resolved.push(outcome);
            }
            Err(e) => {
                // The worker never reported. Release its file and hold it back
                // until the next poll tick, like any failed file.
                if let Some(file) = self.worker_files.remove(&e.id()) {
                    error!(
                        source = %file.source,
                        path = %file.path,
                        error = %e,
                        "Worker did not complete"
                    );
                    self.stats.files_failed += 1;
                    let key = file.key();
                    self.in_flight.remove(&key);
                    self.cooling.insert(key);
                }
            }
        }
        emit!(ActiveWorkers {
            count: self.workers.len(),
        });
    }

    /// Apply resolved outcomes: mark, persist, then release the in-flight markers.
    async fn commit(&mut self) -> Result<(), PipelineError> {
        let resolved = std::mem::take(&mut self.resolved);
        let mut released = Vec::with_capacity(resolved.len());

        for FileOutcome { mut file, result } in resolved {
            match result {
                Ok(summary) => {
                    file.processed_at = Some(chrono::Utc::now());
                    self.stats.files_processed += 1;
                    self.stats.lines += summary.extract.lines;
                    self.stats.records_written += summary.write.records;
                    self.stats.malformed_lines += summary.extract.malformed_lines;
                    self.stats.handler_errors += summary.extract.handler_errors;
                    emit!(FileProcessed {
                        status: FileStatus::Success,
                    });
                    info!(
                        source = %file.source,
                        path = %file.path,
                        records = summary.write.records,
                        malformed_lines = summary.extract.malformed_lines,
                        "Processed file"
                    );
                    if let Some(source) = self.sources.get_mut(&file.source) {
                        source.discovery.mark_complete(&file);
                    }
                }
                Err(e) => {
                    self.stats.files_failed += 1;
                    emit!(FileFailed { stage: e.stage() });
                    self.cooling.insert(file.key());
                    emit!(FileProcessed {
                        status: FileStatus::Failed,
                    });
                    warn!(
                        source = %file.source,
                        path = %file.path,
                        error = %snafu::Report::from_error(&e),
                        "File failed, it will be retried"
                    );
                }
            }
            released.push(file.key());
        }

        self.persist().await?;

        for key in released {
            self.in_flight.remove(&key);
        }
        Ok(())
    }

    /// Persist every source with unsaved changes, retrying with backoff.
    async fn persist(&mut self) -> Result<(), PipelineError> {
        let attempts = self.persist_attempts;
        for (name, source) in &mut self.sources {
            if !source.discovery.is_dirty() {
                continue;
            }

            let mut backoff = PERSIST_BACKOFF;
            let mut attempt = 1;
            loop {
                match source.discovery.persist().await {
                    Ok(()) => break,
                    Err(e) if attempt < attempts => {
                        warn!(
                            source = %name,
                            attempt,
                            error = %snafu::Report::from_error(&e),
                            "Failed to persist state, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = backoff.saturating_mul(2);
                        attempt += 1;
                    }
                    Err(e) => {
                        return Err(e).context(StatePersistSnafu { name, attempts });
                    }
                }
            }
        }
        Ok(())
    }

    /// Discover every source and start work on new files.
    ///
    /// Returns the number of files dispatched. Discovery failures are logged
    /// and retried on the next cycle.
    async fn dispatch(&mut self) -> usize {
        let limit = if self.options.inline {
            1
        } else {
            self.max_concurrent
        };

        let mut candidates = Vec::new();
        for (name, source) in &mut self.sources {
            if self.in_flight.len() + candidates.len() >= limit {
                break;
            }
            match source.discovery.discover().await {
                Ok(files) => {
                    let fresh = files
                        .into_iter()
                        .filter(|file| {
                            let key = file.key();
                            !self.in_flight.contains(&key) && !self.cooling.contains(&key)
                        });
                    for file in fresh {
                        if self.in_flight.len() + candidates.len() >= limit {
                            break;
                        }
                        candidates.push((source.storage.clone(), file));
                    }
                }
                Err(e) => {
                    warn!(
                        source = %name,
                        error = %snafu::Report::from_error(&e),
                        "Discovery failed, retrying next cycle"
                    );
                }
            }
        }

        let dispatched = candidates.len();
        for (storage, file) in candidates {
            self.in_flight.insert(file.key());
            if self.options.inline {
                let result = process_file(&file, storage, self.ctx.clone()).await;
                self.resolved.push(FileOutcome { file, result });
            } else {
                self.spawn_worker(storage, file);
            }
        }

        if dispatched > 0 {
            debug!(
                dispatched,
                in_flight = self.in_flight.len(),
                "Dispatched files"
            );
        }
        dispatched
    }

    fn spawn_worker(&mut self, storage: StorageProviderRef, file: FileDescriptor) {
        let ctx = self.ctx.clone();
        let task_file = file.clone();
        let handle = self.workers.spawn(async move {
            let result = process_file(&task_file, storage, ctx).await;
            FileOutcome {
                file: task_file,
                result,
            }
        });
        self.worker_files.insert(handle.id(), file);
        emit!(ActiveWorkers {
            count: self.workers.len(),
        });
    }
}

/// Drop completion sets of folders behind each source's frontier and persist.
///
/// Returns the number of folders dropped across all sources.
pub async fn clean(config: &Config) -> Result<usize, PipelineError> {
    let state_storage = Arc::new(
        StorageProvider::for_url_with_options(
            &config.state.path,
            config.state.storage_options.clone(),
        )
        .await
        .context(PipelineStorageSnafu)?,
    );

    let mut total = 0;
    for (name, source_config) in &config.sources {
        let storage = Arc::new(
            StorageProvider::for_url_with_options(
                &source_config.path,
                source_config.storage_options.clone(),
            )
            .await
            .context(PipelineStorageSnafu)?,
        );
        let checkpoint = CheckpointManager::new(state_storage.clone(), name);
        let mut discovery = DiscoveryManager::new(name, storage, checkpoint);
        if !discovery.init().await.context(StateLoadSnafu { name })? {
            info!(source = %name, "No state to clean");
            continue;
        }

        let pruned = discovery.prune_before_frontier();
        if discovery.is_dirty() {
            discovery.persist().await.context(StatePersistSnafu {
                name,
                attempts: 1u32,
            })?;
        }
        info!(source = %name, folders = pruned, "Cleaned processed folders");
        total += pruned;
    }
    Ok(total)
}

/// Run the pipeline against the configured InfluxDB sink until `shutdown`.
pub async fn run_pipeline(
    config: Config,
    options: RunOptions,
    shutdown: CancellationToken,
) -> Result<PipelineStats, PipelineError> {
    let sink: MetricSinkRef = Arc::new(InfluxSink::new(&config.sink).context(PipelineSinkSnafu)?);
    let mut pipeline = Pipeline::new(config, sink, shutdown)
        .await?
        .with_options(options);
    pipeline.run().await
}
