use super::producer::ProducerSummary;
use super::worker::ChunkResult;
use super::ImportTask;
use crate::error::LoadError;
use crate::progress::ProgressTracker;
use crate::reader::ResolvedEncoding;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info};

/// Warnings kept per file
const MAX_FILE_WARNINGS: usize = 1000;

/// Outcome of loading one file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportResult {
    pub file: PathBuf,
    pub table_name: String,
    /// Every statement accounted for and none failed
    pub success: bool,
    /// Statements that completed, including skipped non-data statements
    pub processed: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Scanned but never run because the load was cancelled
    pub unattempted: u64,
    pub chunks: u64,
    pub elapsed_secs: f64,
    pub encoding: Option<String>,
    /// True when decoding fell back or replaced characters
    pub degraded_encoding: bool,
    pub replacements: u64,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ImportResult {
    fn for_task(task: &ImportTask) -> Self {
        Self {
            file: task.file.clone(),
            table_name: task.table_name.clone(),
            ..Self::default()
        }
    }

    /// A file that was never opened because the run had already stopped
    pub fn not_started(task: &ImportTask, reason: &str) -> Self {
        Self {
            cancelled: true,
            error: Some(reason.to_string()),
            ..Self::for_task(task)
        }
    }

    /// A file that failed before any chunk was produced
    pub fn failed(task: &ImportTask, err: &LoadError, started: Instant) -> Self {
        Self {
            error: Some(err.to_string()),
            elapsed_secs: started.elapsed().as_secs_f64(),
            ..Self::for_task(task)
        }
    }

    /// Statements the file produced, as far as the scanner got
    pub fn statements(&self) -> u64 {
        self.processed + self.failed + self.unattempted
    }
}

/// Folds chunk results for one file into an [`ImportResult`].
///
/// Lives on the calling thread; workers never touch it.
pub struct ResultAggregator<'a> {
    result: ImportResult,
    progress: &'a ProgressTracker,
    started: Instant,
    /// Sequence of the chunk whose error is currently reported
    error_sequence: Option<u64>,
    warnings_dropped: u64,
}

impl<'a> ResultAggregator<'a> {
    pub fn new(task: &ImportTask, progress: &'a ProgressTracker, started: Instant) -> Self {
        Self {
            result: ImportResult::for_task(task),
            progress,
            started,
            error_sequence: None,
            warnings_dropped: 0,
        }
    }

    pub fn merge(&mut self, chunk: ChunkResult) {
        self.progress.chunk_completed(chunk.processed, chunk.failed);

        self.result.chunks += 1;
        self.result.processed += chunk.processed;
        self.result.failed += chunk.failed;
        self.result.skipped += chunk.skipped;
        self.result.unattempted += chunk.unattempted;
        self.warnings_dropped += chunk.warnings_dropped;

        for w in chunk.warnings {
            if self.result.warnings.len() < MAX_FILE_WARNINGS {
                self.result.warnings.push(w);
            } else {
                self.warnings_dropped += 1;
            }
        }

        // Report the error from the earliest chunk in file order, regardless
        // of which worker finished first
        if let Some(message) = chunk.error {
            if self.error_sequence.map_or(true, |seq| chunk.sequence < seq) {
                self.error_sequence = Some(chunk.sequence);
                self.result.error = Some(format!("chunk {}: {}", chunk.sequence, message));
            }
        }
    }

    /// Failure outside any chunk (a worker thread died)
    pub fn record_fatal(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!(file = %self.result.file.display(), error = %message, "load aborted");
        if self.result.error.is_none() {
            self.result.error = Some(message);
        }
    }

    /// Close the books for this file.
    ///
    /// Every scanned statement must be accounted for as processed, failed,
    /// unattempted or never sent; a mismatch is reported as an internal error.
    pub fn finish(
        mut self,
        producer: ProducerSummary,
        resolved: Option<&ResolvedEncoding>,
        replacements: u64,
    ) -> ImportResult {
        let r = &mut self.result;
        r.unattempted += producer.unsent;
        r.cancelled = producer.cancelled || r.unattempted > 0;
        r.replacements = replacements;
        if let Some(resolved) = resolved {
            r.encoding = Some(resolved.name().to_string());
            r.degraded_encoding = resolved.degraded || replacements > 0;
        }

        if let Some(err) = producer.error {
            if r.error.is_none() {
                r.error = Some(err.to_string());
            }
        }

        let accounted = r.statements();
        if accounted != producer.statements && r.error.is_none() {
            r.error = Some(
                LoadError::internal(format!(
                    "scanned {} statements but accounted for {}",
                    producer.statements, accounted
                ))
                .to_string(),
            );
        }

        if self.warnings_dropped > 0 {
            r.warnings
                .push(format!("{} more warnings not shown", self.warnings_dropped));
        }

        r.success = r.error.is_none() && !r.cancelled && r.failed == 0;
        r.elapsed_secs = self.started.elapsed().as_secs_f64();

        info!(
            file = %r.file.display(),
            table = %r.table_name,
            processed = r.processed,
            failed = r.failed,
            skipped = r.skipped,
            unattempted = r.unattempted,
            success = r.success,
            elapsed_secs = r.elapsed_secs,
            "file finished"
        );
        self.result
    }
}
