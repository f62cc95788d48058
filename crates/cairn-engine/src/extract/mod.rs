//! Extraction of a directory tree onto the local filesystem.
//!
//! ```text
//! walk ──desc──▶ batch ──batch──▶ fetch × N ──fetched──▶ write × M
//! ```
//!
//! Stages are connected by bounded queues, so a slow stage suspends the one
//! feeding it. Any stage error cancels every stage through one shared token;
//! bytes already written stay on disk and a re-run repairs them.

mod batch;
mod fetch;
mod walk;
mod write;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use cairn_store::BlobStore;
use cairn_tree::DirectoryNode;
use cairn_types::{ChunkRef, ExtractConfig};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::progress::{ProgressSink, Stats, TracingProgress, spawn_reporter};
use write::FileTarget;

/// One leaf to be written somewhere in a destination file.
#[derive(Debug)]
pub(crate) struct ChunkDescriptor {
    pub(crate) target: Arc<FileTarget>,
    pub(crate) offset: u64,
    pub(crate) chunk: ChunkRef,
    pub(crate) locality: Option<u64>,
}

/// Descriptors fetched together.
#[derive(Debug)]
pub(crate) struct Batch {
    pub(crate) locality: Option<u64>,
    pub(crate) chunks: Vec<ChunkDescriptor>,
}

/// A batch whose payloads have been fetched and verified.
#[derive(Debug)]
pub(crate) struct FetchedBatch {
    pub(crate) chunks: Vec<(ChunkDescriptor, Bytes)>,
}

/// Tracks whether every leaf the walk found was handed on, so a run that
/// finished its work is never reported as cancelled.
#[derive(Debug, Default)]
pub(crate) struct Completion {
    walked: AtomicBool,
    queued: AtomicU64,
}

impl Completion {
    /// Count one descriptor accepted by the batch stage.
    pub(crate) fn add_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    /// The walk visited every directory and file.
    pub(crate) fn mark_walked(&self) {
        self.walked.store(true, Ordering::Relaxed);
    }

    /// Whether the walk finished and `written` covers every queued chunk.
    /// Only meaningful once all stages have been joined.
    pub(crate) fn is_complete(&self, written: u64) -> bool {
        self.walked.load(Ordering::Relaxed) && self.queued.load(Ordering::Relaxed) == written
    }
}

/// Outcome of one extraction run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractSummary {
    /// Files fully written.
    pub files: u64,
    /// Directories created.
    pub directories: u64,
    /// Chunks written.
    pub chunks: u64,
    /// Payload bytes written.
    pub bytes: u64,
    /// Wall-clock duration.
    pub elapsed: Duration,
    /// Whether the caller's cancellation stopped the run before every file
    /// was written. Cancelling after the work is done leaves this `false`.
    pub cancelled: bool,
}

/// Materializes directory trees on disk.
pub struct Extractor {
    store: Arc<dyn BlobStore>,
    config: ExtractConfig,
    progress: Arc<dyn ProgressSink>,
}

impl Extractor {
    /// Create an extractor reporting progress through `tracing`.
    pub fn new(store: Arc<dyn BlobStore>, config: ExtractConfig) -> Result<Self, EngineError> {
        config.validate().map_err(EngineError::InvalidConfig)?;
        Ok(Self {
            store,
            config,
            progress: Arc::new(TracingProgress),
        })
    }

    /// Report progress to `sink` instead.
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Write the tree under `root` into `dest`, creating it if needed.
    pub async fn extract(
        &self,
        root: &DirectoryNode,
        dest: &Path,
    ) -> Result<ExtractSummary, EngineError> {
        self.extract_with_cancel(root, dest, CancellationToken::new())
            .await
    }

    /// Like [`Extractor::extract`], stopping early once `cancel` fires.
    ///
    /// Cancellation by the caller is not an error: the summary comes back
    /// with `cancelled` set. A stage failure returns the first error seen.
    #[tracing::instrument(skip(self, root, dest, cancel), fields(dest = %dest.display()))]
    pub async fn extract_with_cancel(
        &self,
        root: &DirectoryNode,
        dest: &Path,
        cancel: CancellationToken,
    ) -> Result<ExtractSummary, EngineError> {
        let cfg = self.config;
        // Stage failures cancel this child token, never the caller's.
        let run = cancel.child_token();
        let stats = Arc::new(Stats::new());
        let completion = Arc::new(Completion::default());

        let stop_reporting = CancellationToken::new();
        let reporter = spawn_reporter(
            stats.clone(),
            self.progress.clone(),
            Duration::from_millis(cfg.progress_interval_ms),
            cfg.throughput_window,
            stop_reporting.clone(),
        );

        let (desc_tx, desc_rx) = mpsc::channel(cfg.queue_depth);
        let (batch_tx, batch_rx) = mpsc::channel(cfg.queue_depth);
        let (fetched_tx, fetched_rx) = mpsc::channel(cfg.queue_depth);
        let batch_rx = Arc::new(Mutex::new(batch_rx));
        let fetched_rx = Arc::new(Mutex::new(fetched_rx));

        let mut tasks: JoinSet<Result<(), EngineError>> = JoinSet::new();
        tasks.spawn(walk::walk(
            self.store.clone(),
            root.clone(),
            dest.to_path_buf(),
            desc_tx,
            stats.clone(),
            completion.clone(),
            run.clone(),
        ));
        tasks.spawn(batch::batch(desc_rx, batch_tx, cfg.batch_limit, run.clone()));
        for worker in 0..cfg.fetch_workers {
            tasks.spawn(fetch::fetch_worker(
                worker,
                self.store.clone(),
                batch_rx.clone(),
                fetched_tx.clone(),
                run.clone(),
            ));
        }
        // Write workers see the end of input once every fetch worker is done.
        drop(fetched_tx);
        for worker in 0..cfg.write_workers {
            tasks.spawn(write::write_worker(
                worker,
                fetched_rx.clone(),
                stats.clone(),
                run.clone(),
            ));
        }

        let mut first_error: Option<EngineError> = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.unwrap_or_else(|e| Err(EngineError::Join(e.to_string())));
            if let Err(e) = outcome {
                run.cancel();
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        stop_reporting.cancel();
        if let Err(e) = reporter.await {
            warn!(error = %e, "progress reporter failed");
        }

        if let Some(e) = first_error {
            warn!(error = %e, "extract: failed");
            return Err(e);
        }

        let snapshot = stats.snapshot();
        let summary = ExtractSummary {
            files: snapshot.files,
            directories: snapshot.directories,
            chunks: snapshot.chunks,
            bytes: snapshot.bytes,
            elapsed: snapshot.elapsed,
            cancelled: !completion.is_complete(snapshot.chunks),
        };
        info!(
            files = summary.files,
            bytes = summary.bytes,
            cancelled = summary.cancelled,
            "extract: complete"
        );
        Ok(summary)
    }
}
