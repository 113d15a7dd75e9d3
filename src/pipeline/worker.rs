use super::producer::{Job, StatementChunk};
use super::retry::RetryPolicy;
use super::CancellationToken;
use crate::error::{ErrorCategory, LoadError, Result};
use crate::parser::{classify, strip_leading_noise, StatementKind};
use crate::rewrite::{DialectRewriter, RewriteStats};
use crate::store::{ConnectionPool, StoreConnection};
use crossbeam_channel::{Receiver, Sender};
use encoding_rs::{Encoding, UTF_8};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Warnings kept per chunk; the rest are only counted
const MAX_CHUNK_WARNINGS: usize = 100;
const PREVIEW_CHARS: usize = 120;

/// Result of one statement, never kept past its chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementOutcome {
    pub succeeded: bool,
    /// Not a data statement; counted as processed, never executed
    pub skipped: bool,
    pub message: Option<String>,
}

impl StatementOutcome {
    fn executed() -> Self {
        Self {
            succeeded: true,
            skipped: false,
            message: None,
        }
    }

    fn skipped(kind: StatementKind) -> Self {
        Self {
            succeeded: true,
            skipped: true,
            message: Some(format!("skipped {} statement", kind)),
        }
    }

    fn failed(message: String) -> Self {
        Self {
            succeeded: false,
            skipped: false,
            message: Some(message),
        }
    }
}

/// Everything a worker reports about one chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkResult {
    pub sequence: u64,
    pub processed: u64,
    pub failed: u64,
    /// Subset of `processed`
    pub skipped: u64,
    /// Left behind because cancellation was observed
    pub unattempted: u64,
    pub elapsed: Duration,
    /// Chunk-fatal error; marks the whole file failed
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub warnings_dropped: u64,
}

impl ChunkResult {
    fn new(sequence: u64) -> Self {
        Self {
            sequence,
            ..Self::default()
        }
    }

    fn warn(&mut self, message: String) {
        if self.warnings.len() < MAX_CHUNK_WARNINGS {
            self.warnings.push(message);
        } else {
            self.warnings_dropped += 1;
        }
    }

    pub fn statements(&self) -> u64 {
        self.processed + self.failed + self.unattempted
    }
}

fn preview(stmt: &str) -> String {
    let mut chars = stmt.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// One worker of the pool. Borrows everything it shares with siblings.
pub struct Worker<'a, C: StoreConnection> {
    pub id: usize,
    pub pool: &'a ConnectionPool<C>,
    pub rewriter: &'a DialectRewriter,
    pub stats: &'a RewriteStats,
    pub retry: RetryPolicy,
    pub timeout: Duration,
    pub stop_on_error: bool,
    pub target_encoding: &'static Encoding,
    pub token: CancellationToken,
}

impl<C: StoreConnection> Worker<'_, C> {
    /// Pull chunks until a stop sentinel arrives or the queue disconnects.
    pub fn run(&self, jobs: Receiver<Job>, results: Sender<ChunkResult>) {
        for job in jobs.iter() {
            let chunk = match job {
                Job::Chunk(chunk) => chunk,
                Job::Stop => break,
            };
            let result = self.process_chunk(chunk);
            if results.send(result).is_err() {
                break;
            }
        }
        debug!(worker = self.id, "worker exiting");
    }

    /// Process statements in order, each in its own transaction.
    ///
    /// Cancellation is checked before every statement. Once seen, the rest
    /// of the chunk is reported as unattempted rather than executed.
    pub fn process_chunk(&self, chunk: StatementChunk) -> ChunkResult {
        let started = Instant::now();
        let mut result = ChunkResult::new(chunk.sequence);
        let total = chunk.statements.len();

        for (index, stmt) in chunk.statements.iter().enumerate() {
            if self.token.is_cancelled() {
                result.unattempted = (total - index) as u64;
                break;
            }

            match self.process_statement(stmt, &mut result) {
                Ok(outcome) if outcome.succeeded => {
                    result.processed += 1;
                    if outcome.skipped {
                        result.skipped += 1;
                    }
                }
                Ok(outcome) => {
                    result.failed += 1;
                    let message = outcome.message.unwrap_or_default();
                    warn!(
                        worker = self.id,
                        chunk = chunk.sequence,
                        statement = index,
                        error = %message,
                        "statement failed"
                    );
                    result.warn(format!(
                        "chunk {} statement {}: {} [{}]",
                        chunk.sequence,
                        index,
                        message,
                        preview(stmt)
                    ));
                    if self.stop_on_error {
                        self.token.cancel();
                    }
                }
                Err(LoadError::Cancelled) => {
                    debug!(
                        worker = self.id,
                        chunk = chunk.sequence,
                        statement = index,
                        "retry abandoned on cancellation"
                    );
                    result.unattempted = (total - index) as u64;
                    break;
                }
                Err(fatal) => {
                    warn!(worker = self.id, chunk = chunk.sequence, error = %fatal, "chunk aborted");
                    result.error = Some(fatal.to_string());
                    result.unattempted = (total - index) as u64;
                    break;
                }
            }
        }

        result.elapsed = started.elapsed();
        debug!(
            worker = self.id,
            chunk = chunk.sequence,
            span_start = chunk.span.start,
            processed = result.processed,
            failed = result.failed,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "chunk done"
        );
        result
    }

    /// Classify, rewrite and execute one statement.
    ///
    /// `Err` is reserved for chunk-fatal conditions (broken invariants) and
    /// for a retry abandoned on cancellation; every other store failure
    /// becomes a failed outcome.
    fn process_statement(&self, stmt: &str, result: &mut ChunkResult) -> Result<StatementOutcome> {
        let kind = classify(stmt);
        if !kind.is_data() {
            return Ok(StatementOutcome::skipped(kind));
        }

        let rewritten = self.rewriter.rewrite(strip_leading_noise(stmt), self.stats);
        for w in &rewritten.warnings {
            result.warn(format!("chunk {}: {}", result.sequence, w));
        }

        if self.target_encoding != UTF_8 {
            let (_, _, unmappable) = self.target_encoding.encode(&rewritten.sql);
            if unmappable {
                return Ok(StatementOutcome::failed(format!(
                    "statement contains characters not representable in {}",
                    self.target_encoding.name()
                )));
            }
        }

        match self
            .retry
            .run(&self.token, |attempt| self.execute_once(&rewritten.sql, attempt))
        {
            Ok(_) => Ok(StatementOutcome::executed()),
            Err(e) if e.category() == ErrorCategory::Internal => Err(e),
            Err(LoadError::Cancelled) => Err(LoadError::Cancelled),
            Err(e) => Ok(StatementOutcome::failed(e.to_string())),
        }
    }

    /// One attempt: acquire, begin, execute, check the deadline, commit.
    fn execute_once(&self, sql: &str, attempt: u32) -> Result<usize> {
        let mut conn = self.pool.acquire(self.timeout)?;
        let started = Instant::now();

        if let Err(e) = conn.begin() {
            if e.is_retryable() {
                conn.discard();
            }
            return Err(e);
        }

        let rows = match conn.execute(sql) {
            Ok(rows) => rows,
            Err(e) => {
                let rolled_back = conn.rollback().is_ok();
                if e.is_retryable() || !rolled_back {
                    conn.discard();
                }
                return Err(e);
            }
        };

        let elapsed = started.elapsed();
        if elapsed > self.timeout {
            if conn.rollback().is_err() {
                conn.discard();
            }
            return Err(LoadError::timeout(format!(
                "statement took {:?} on attempt {}, limit {:?}",
                elapsed, attempt, self.timeout
            )));
        }

        match conn.commit() {
            Ok(()) => Ok(rows),
            Err(e) => {
                if conn.rollback().is_err() || e.is_retryable() {
                    conn.discard();
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::RewriteConfig;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    /// Records executed SQL; fails any statement containing `FAIL`
    struct Recording {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl StoreConnection for Recording {
        fn execute(&mut self, sql: &str) -> Result<usize> {
            if sql.contains("FAIL") {
                return Err(LoadError::constraint("duplicate key"));
            }
            self.log.lock().unwrap().push(sql.to_string());
            Ok(1)
        }
        fn begin(&mut self) -> Result<()> {
            Ok(())
        }
        fn commit(&mut self) -> Result<()> {
            Ok(())
        }
        fn rollback(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn chunk(statements: &[&str]) -> StatementChunk {
        StatementChunk {
            sequence: 0,
            file: PathBuf::from("t.sql"),
            statements: statements.iter().map(|s| s.to_string()).collect(),
            span: 0..0,
        }
    }

    fn with_worker<T>(stop_on_error: bool, f: impl FnOnce(&Worker<'_, Recording>, &Arc<Mutex<Vec<String>>>) -> T) -> T {
        let log = Arc::new(Mutex::new(Vec::new()));
        let shared = Arc::clone(&log);
        let pool = ConnectionPool::new(1, move || {
            Ok(Recording {
                log: Arc::clone(&shared),
            })
        });
        let rewriter = DialectRewriter::new(&RewriteConfig {
            target_schema: "main".into(),
            ..RewriteConfig::default()
        });
        let stats = rewriter.new_stats();
        let worker = Worker {
            id: 0,
            pool: &pool,
            rewriter: &rewriter,
            stats: &stats,
            retry: RetryPolicy::none(),
            timeout: Duration::from_secs(5),
            stop_on_error,
            target_encoding: UTF_8,
            token: CancellationToken::new(),
        };
        f(&worker, &log)
    }

    #[test]
    fn test_noise_is_skipped_not_failed() {
        with_worker(false, |worker, log| {
            let result = worker.process_chunk(chunk(&[
                "-- comment",
                "COMMIT;",
                "SET DEFINE OFF;",
                "INSERT INTO t VALUES (1);",
            ]));
            assert_eq!(result.processed, 4);
            assert_eq!(result.skipped, 3);
            assert_eq!(result.failed, 0);
            assert_eq!(
                log.lock().unwrap().as_slice(),
                [r#"INSERT INTO "main"."t" VALUES (1);"#]
            );
        });
    }

    #[test]
    fn test_failure_is_isolated() {
        with_worker(false, |worker, log| {
            let result = worker.process_chunk(chunk(&[
                "INSERT INTO t VALUES (1);",
                "INSERT INTO t VALUES ('FAIL');",
                "INSERT INTO t VALUES (3);",
            ]));
            assert_eq!(result.processed, 2);
            assert_eq!(result.failed, 1);
            assert_eq!(result.warnings.len(), 1);
            assert_eq!(log.lock().unwrap().len(), 2);
        });
    }

    #[test]
    fn test_stop_on_error_leaves_rest_unattempted() {
        with_worker(true, |worker, log| {
            let result = worker.process_chunk(chunk(&[
                "INSERT INTO t VALUES (1);",
                "INSERT INTO t VALUES ('FAIL');",
                "INSERT INTO t VALUES (3);",
                "INSERT INTO t VALUES (4);",
            ]));
            assert_eq!(result.processed, 1);
            assert_eq!(result.failed, 1);
            assert_eq!(result.unattempted, 2);
            assert!(worker.token.is_cancelled());
            assert_eq!(log.lock().unwrap().len(), 1);
        });
    }

    #[test]
    fn test_unrepresentable_in_target_encoding() {
        with_worker(false, |worker, _| {
            let latin = Worker {
                target_encoding: encoding_rs::WINDOWS_1252,
                token: CancellationToken::new(),
                ..*worker
            };
            let result = latin.process_chunk(chunk(&["INSERT INTO t VALUES ('科室');"]));
            assert_eq!(result.failed, 1);
        });
    }

    /// Drops every connection and cancels the run on the first attempt
    struct Dropping {
        token: CancellationToken,
    }

    impl StoreConnection for Dropping {
        fn execute(&mut self, _sql: &str) -> Result<usize> {
            self.token.cancel();
            Err(LoadError::connection("server closed the connection"))
        }
        fn begin(&mut self) -> Result<()> {
            Ok(())
        }
        fn commit(&mut self) -> Result<()> {
            Ok(())
        }
        fn rollback(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_cancelled_retry_leaves_statement_unattempted() {
        let token = CancellationToken::new();
        let shared = token.clone();
        let pool = ConnectionPool::new(1, move || {
            Ok(Dropping {
                token: shared.clone(),
            })
        });
        let rewriter = DialectRewriter::new(&RewriteConfig::default());
        let stats = rewriter.new_stats();
        let worker = Worker {
            id: 0,
            pool: &pool,
            rewriter: &rewriter,
            stats: &stats,
            retry: RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_millis(1),
                multiplier: 2.0,
                max_delay: Duration::from_millis(5),
            },
            timeout: Duration::from_secs(5),
            stop_on_error: false,
            target_encoding: UTF_8,
            token,
        };

        let result = worker.process_chunk(chunk(&[
            "INSERT INTO t VALUES (1);",
            "INSERT INTO t VALUES (2);",
        ]));
        assert_eq!(result.processed, 0);
        assert_eq!(result.failed, 0);
        assert_eq!(result.unattempted, 2);
        assert!(result.error.is_none());
        assert_eq!(pool.stats().discarded, 1);
    }

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(500);
        assert_eq!(preview(&long).len(), PREVIEW_CHARS + 3);
        assert_eq!(preview("short"), "short");
    }
}
