//! Shared progress tracking.
//!
//! One [`ProgressTracker`] is shared by the producer (which learns about new
//! chunks) and the aggregator (which learns about finished ones). Every read
//! is a [`ProgressSnapshot`] copied under the lock, so a callback never sees
//! a half-updated struct.

use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

/// Mutable counters behind the tracker's lock
#[derive(Debug, Clone, Default)]
pub struct Progress {
    pub current_file: Option<String>,
    pub chunks_total: u64,
    pub chunks_completed: u64,
    pub statements_processed: u64,
    pub statements_failed: u64,
    pub producer_done: bool,
}

/// Immutable copy handed to progress callbacks
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProgressSnapshot {
    pub current_file: Option<String>,
    pub chunks_total: u64,
    pub chunks_completed: u64,
    pub statements_processed: u64,
    pub statements_failed: u64,
    /// True once every chunk of the current file has been queued
    pub producer_done: bool,
    pub elapsed_secs: f64,
}

impl ProgressSnapshot {
    /// Share of known chunks completed. Only final once `producer_done`.
    pub fn completion_percentage(&self) -> f64 {
        if self.chunks_total == 0 {
            return if self.producer_done { 100.0 } else { 0.0 };
        }
        (self.chunks_completed as f64 / self.chunks_total as f64) * 100.0
    }
}

#[derive(Debug)]
pub struct ProgressTracker {
    inner: Mutex<Progress>,
    started: Instant,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Progress::default()),
            started: Instant::now(),
        }
    }

    // A panic elsewhere must not take progress reporting down with it
    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn start_file(&self, path: &Path) {
        let mut p = self.lock();
        *p = Progress {
            current_file: Some(path.display().to_string()),
            ..Progress::default()
        };
    }

    pub fn chunk_queued(&self) {
        self.lock().chunks_total += 1;
    }

    pub fn producer_finished(&self) {
        self.lock().producer_done = true;
    }

    pub fn chunk_completed(&self, processed: u64, failed: u64) {
        let mut p = self.lock();
        p.chunks_completed += 1;
        p.statements_processed += processed;
        p.statements_failed += failed;
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let p = self.lock().clone();
        ProgressSnapshot {
            current_file: p.current_file,
            chunks_total: p.chunks_total,
            chunks_completed: p.chunks_completed,
            statements_processed: p.statements_processed,
            statements_failed: p.statements_failed,
            producer_done: p.producer_done,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_is_a_copy() {
        let tracker = ProgressTracker::new();
        tracker.start_file(Path::new("a.sql"));
        tracker.chunk_queued();
        tracker.chunk_queued();
        let before = tracker.snapshot();

        tracker.chunk_completed(10, 1);
        assert_eq!(before.chunks_completed, 0);
        assert_eq!(before.completion_percentage(), 0.0);

        let after = tracker.snapshot();
        assert_eq!(after.statements_processed, 10);
        assert_eq!(after.statements_failed, 1);
        assert_eq!(after.completion_percentage(), 50.0);
    }

    #[test]
    fn test_start_file_resets_counters() {
        let tracker = ProgressTracker::new();
        tracker.start_file(Path::new("a.sql"));
        tracker.chunk_queued();
        tracker.chunk_completed(3, 0);
        tracker.start_file(Path::new("b.sql"));

        let snap = tracker.snapshot();
        assert_eq!(snap.current_file.as_deref(), Some("b.sql"));
        assert_eq!(snap.chunks_total, 0);
        assert_eq!(snap.statements_processed, 0);
    }

    #[test]
    fn test_empty_file_is_complete_once_produced() {
        let tracker = ProgressTracker::new();
        assert_eq!(tracker.snapshot().completion_percentage(), 0.0);
        tracker.producer_finished();
        assert_eq!(tracker.snapshot().completion_percentage(), 100.0);
    }
}
