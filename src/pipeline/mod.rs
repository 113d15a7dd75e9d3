//! Streaming load pipeline.
//!
//! One file at a time: a producer thread scans and chunks statements into a
//! bounded queue, a fixed set of worker threads rewrites and executes them,
//! and the calling thread folds chunk results into an [`ImportResult`].
//!
//! ```text
//!   reader -> scanner -> ChunkProducer --(bounded Job queue)--> Worker x N
//!                                                                  |
//!   ImportResult <- ResultAggregator <----(ChunkResult channel)----+
//! ```
//!
//! Shutdown is by sentinel: the producer sends one [`Job::Stop`] per worker
//! after the last chunk. Cancellation is observed between statements, never
//! inside one.

mod aggregate;
mod producer;
mod retry;
mod worker;

pub use aggregate::{ImportResult, ResultAggregator};
pub use producer::{ChunkProducer, Job, ProducerSummary, StatementChunk};
pub use retry::RetryPolicy;
pub use worker::{ChunkResult, StatementOutcome, Worker};

use crate::config::LoaderConfig;
use crate::error::Result;
use crate::parser::{determine_buffer_size, StatementScanner};
use crate::progress::{ProgressSnapshot, ProgressTracker};
use crate::reader::{encoding_for_label, Compression, EncodingResolver};
use crate::rewrite::{DialectRewriter, RewriteStats};
use crate::store::{ConnectionPool, StoreConnection};
use crossbeam_channel::{bounded, unbounded};
use encoding_rs::{Encoding, UTF_8};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{info, warn};

/// Cooperative stop signal shared by every thread of a run.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// One file to load into one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportTask {
    pub file: PathBuf,
    pub table_name: String,
    pub encoding_hint: String,
    pub target_encoding: String,
}

impl ImportTask {
    pub fn new(file: impl Into<PathBuf>, table_name: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            table_name: table_name.into(),
            encoding_hint: "utf-8".to_string(),
            target_encoding: "utf-8".to_string(),
        }
    }

    /// Task for a dump file, naming the table after the file.
    ///
    /// `insert_V_HIS_KSDMDZB_data.sql.gz` targets `V_HIS_KSDMDZB`.
    pub fn for_file(path: &Path, encoding_hint: &str, target_encoding: &str) -> Self {
        Self {
            encoding_hint: encoding_hint.to_string(),
            target_encoding: target_encoding.to_string(),
            ..Self::new(path, table_name_for(path))
        }
    }
}

fn table_name_for(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut name = file_name.as_str();
    if Compression::from_path(path) != Compression::None {
        name = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
    }
    if let Some(stem) = strip_suffix_ignore_case(name, ".sql") {
        name = stem;
    }
    if let Some(rest) = strip_prefix_ignore_case(name, "insert_") {
        name = rest;
    }
    if let Some(rest) = strip_suffix_ignore_case(name, "_data") {
        name = rest;
    }
    name.to_string()
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    (head.eq_ignore_ascii_case(prefix) && s.len() > prefix.len()).then(|| &s[prefix.len()..])
}

fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    let cut = s.len().checked_sub(suffix.len())?;
    let tail = s.get(cut..)?;
    (tail.eq_ignore_ascii_case(suffix) && cut > 0).then(|| &s[..cut])
}

/// Drives the pipeline for one or more files against one pool.
pub struct Loader<C: StoreConnection> {
    config: LoaderConfig,
    pool: ConnectionPool<C>,
    rewriter: DialectRewriter,
    stats: RewriteStats,
    resolver: EncodingResolver,
    token: CancellationToken,
}

impl<C: StoreConnection> Loader<C> {
    pub fn new(config: LoaderConfig, pool: ConnectionPool<C>) -> Result<Self> {
        config.validate()?;
        let rewriter = DialectRewriter::new(&config.rewrite_config());
        let stats = rewriter.new_stats();
        let resolver = config.encoding_resolver();
        Ok(Self {
            config,
            pool,
            rewriter,
            stats,
            resolver,
            token: CancellationToken::new(),
        })
    }

    /// Replace the rule set. Resets the rewrite counters.
    pub fn with_rewriter(mut self, rewriter: DialectRewriter) -> Self {
        self.stats = rewriter.new_stats();
        self.rewriter = rewriter;
        self
    }

    pub fn with_resolver(mut self, resolver: EncodingResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Handle for stopping the run from another thread
    pub fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Rule firing counts accumulated over every file this loader ran
    pub fn rewrite_stats(&self) -> &RewriteStats {
        &self.stats
    }

    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Load files one after another, each with the full worker pool.
    ///
    /// A failed file never stops its siblings. Once the run is cancelled the
    /// remaining files are reported as not started.
    pub fn load_all(
        &self,
        tasks: &[ImportTask],
        on_progress: &mut dyn FnMut(&ProgressSnapshot),
    ) -> Vec<ImportResult> {
        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            if self.token.is_cancelled() {
                results.push(ImportResult::not_started(task, "run cancelled before file started"));
                continue;
            }
            results.push(self.load(task, on_progress));
        }
        results
    }

    /// Load one file. Never panics and never returns early with `Err`:
    /// every failure is reported inside the [`ImportResult`].
    pub fn load(
        &self,
        task: &ImportTask,
        on_progress: &mut dyn FnMut(&ProgressSnapshot),
    ) -> ImportResult {
        let started = Instant::now();
        let progress = ProgressTracker::new();
        progress.start_file(&task.file);

        if self.token.is_cancelled() {
            return ImportResult::not_started(task, "run cancelled before file started");
        }

        let opened = match self.resolver.open(&task.file, &task.encoding_hint) {
            Ok(opened) => opened,
            Err(e) => {
                warn!(file = %task.file.display(), error = %e, "could not open file");
                return ImportResult::failed(task, &e, started);
            }
        };
        let resolved = opened.resolved;
        let replacements = opened.reader.replacement_counter();
        let buffer_size = std::fs::metadata(&task.file)
            .map(|m| determine_buffer_size(m.len()))
            .unwrap_or_else(|_| determine_buffer_size(0));
        let scanner = StatementScanner::with_capacity(opened.reader, buffer_size);
        let target = target_encoding(task);

        info!(
            file = %task.file.display(),
            table = %task.table_name,
            encoding = resolved.name(),
            workers = self.config.workers,
            chunk_size = self.config.chunk_size,
            "loading file"
        );

        let workers = self.config.workers;
        let (job_tx, job_rx) = bounded(self.config.queue_depth());
        let (result_tx, result_rx) = unbounded();
        let producer = ChunkProducer::new(self.config.chunk_size);

        let progress = &progress;
        let token = &self.token;
        let file = task.file.as_path();

        thread::scope(|s| {
            let producer_handle = s.spawn(move || {
                producer.run(scanner, file, &job_tx, workers, token, progress)
            });

            let worker_handles: Vec<_> = (0..workers)
                .map(|id| {
                    let worker = Worker {
                        id,
                        pool: &self.pool,
                        rewriter: &self.rewriter,
                        stats: &self.stats,
                        retry: self.config.retry_policy(),
                        timeout: self.config.statement_timeout(),
                        stop_on_error: self.config.stop_on_error,
                        target_encoding: target,
                        token: self.token.clone(),
                    };
                    let jobs = job_rx.clone();
                    let results = result_tx.clone();
                    s.spawn(move || worker.run(jobs, results))
                })
                .collect();

            // Only worker threads may hold these, or the loops below never end
            drop(job_rx);
            drop(result_tx);

            let mut aggregator = ResultAggregator::new(task, progress, started);
            for chunk in result_rx.iter() {
                aggregator.merge(chunk);
                on_progress(&progress.snapshot());
            }

            for (id, handle) in worker_handles.into_iter().enumerate() {
                if handle.join().is_err() {
                    aggregator.record_fatal(format!("worker {} panicked", id));
                }
            }
            let summary = producer_handle.join().unwrap_or_else(|_| {
                aggregator.record_fatal("producer panicked");
                ProducerSummary::default()
            });

            let result = aggregator.finish(
                summary,
                Some(&resolved),
                replacements.load(Ordering::Relaxed),
            );
            on_progress(&progress.snapshot());
            result
        })
    }
}

fn target_encoding(task: &ImportTask) -> &'static Encoding {
    encoding_for_label(&task.target_encoding).unwrap_or_else(|| {
        warn!(
            file = %task.file.display(),
            label = %task.target_encoding,
            "unknown target encoding, using UTF-8"
        );
        UTF_8
    })
}
