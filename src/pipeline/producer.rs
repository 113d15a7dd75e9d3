use super::CancellationToken;
use crate::error::{LoadError, Result};
use crate::parser::ScannedStatement;
use crate::progress::ProgressTracker;
use crossbeam_channel::Sender;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A batch of complete statements, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementChunk {
    pub sequence: u64,
    pub file: PathBuf,
    pub statements: Vec<String>,
    /// Decoded byte range from the first statement's start to the last one's end
    pub span: Range<u64>,
}

impl StatementChunk {
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// What travels over the work queue
#[derive(Debug)]
pub enum Job {
    Chunk(StatementChunk),
    /// One per worker; the worker exits on receipt
    Stop,
}

/// What the producer saw, for the aggregator's accounting.
#[derive(Debug, Default)]
pub struct ProducerSummary {
    pub chunks: u64,
    /// Statements pulled from the scanner
    pub statements: u64,
    /// Scanned statements never queued (cancellation or no live workers)
    pub unsent: u64,
    pub cancelled: bool,
    /// Read failure that ended the scan early
    pub error: Option<LoadError>,
}

impl ProducerSummary {
    pub fn failed(error: LoadError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Cuts the statement stream into fixed-count chunks and feeds the queue.
///
/// Sending blocks while the bounded queue is full; that block is the only
/// backpressure in the pipeline.
pub struct ChunkProducer {
    chunk_size: usize,
}

impl ChunkProducer {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn run<I>(
        &self,
        statements: I,
        file: &Path,
        tx: &Sender<Job>,
        workers: usize,
        token: &CancellationToken,
        progress: &ProgressTracker,
    ) -> ProducerSummary
    where
        I: IntoIterator<Item = Result<ScannedStatement>>,
    {
        let mut summary = ProducerSummary::default();
        let mut pending: Vec<String> = Vec::with_capacity(self.chunk_size);
        let mut span: Option<Range<u64>> = None;
        let mut workers_gone = false;

        for item in statements {
            let stmt = match item {
                Ok(stmt) => stmt,
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "statement scan failed");
                    summary.error = Some(e);
                    break;
                }
            };

            summary.statements += 1;
            if token.is_cancelled() {
                summary.cancelled = true;
                summary.unsent += 1;
                break;
            }
            span = Some(match span {
                Some(s) => s.start..stmt.span.end,
                None => stmt.span.clone(),
            });
            pending.push(stmt.text);

            if pending.len() >= self.chunk_size {
                let chunk = self.make_chunk(&mut summary, file, &mut pending, span.take());
                if !publish(chunk, tx, &mut summary, progress) {
                    workers_gone = true;
                    break;
                }
            }
        }

        if !pending.is_empty() {
            if summary.cancelled || workers_gone {
                summary.unsent += pending.len() as u64;
            } else {
                let chunk = self.make_chunk(&mut summary, file, &mut pending, span.take());
                publish(chunk, tx, &mut summary, progress);
            }
        }

        progress.producer_finished();

        for _ in 0..workers {
            if tx.send(Job::Stop).is_err() {
                break;
            }
        }

        debug!(
            file = %file.display(),
            chunks = summary.chunks,
            statements = summary.statements,
            unsent = summary.unsent,
            cancelled = summary.cancelled,
            "producer finished"
        );
        summary
    }

    fn make_chunk(
        &self,
        summary: &mut ProducerSummary,
        file: &Path,
        pending: &mut Vec<String>,
        span: Option<Range<u64>>,
    ) -> StatementChunk {
        let statements = std::mem::replace(pending, Vec::with_capacity(self.chunk_size));
        let chunk = StatementChunk {
            sequence: summary.chunks,
            file: file.to_path_buf(),
            statements,
            span: span.unwrap_or(0..0),
        };
        summary.chunks += 1;
        chunk
    }
}

/// Returns false when every receiver is gone.
fn publish(
    chunk: StatementChunk,
    tx: &Sender<Job>,
    summary: &mut ProducerSummary,
    progress: &ProgressTracker,
) -> bool {
    let len = chunk.len() as u64;
    match tx.send(Job::Chunk(chunk)) {
        Ok(()) => {
            progress.chunk_queued();
            true
        }
        Err(_) => {
            summary.chunks -= 1;
            summary.unsent += len;
            false
        }
    }
}
