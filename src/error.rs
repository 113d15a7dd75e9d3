//! Error taxonomy for the loader.
//!
//! Every failure is classified so the pipeline can decide what to do with it:
//! - Retryable errors (connection drop, timeout, pool exhaustion) go through
//!   the retry policy before they count as a failed statement
//! - Terminal statement errors (constraint violation, malformed SQL) fail one
//!   statement and processing continues
//! - File-level errors (encoding, I/O) fail one file and never touch siblings

use std::path::PathBuf;
use thiserror::Error;

/// Result type for loader operations
pub type Result<T> = std::result::Result<T, LoadError>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// No candidate encoding could open the file
    Encoding,
    /// The scanner could not make forward progress
    Parse,
    /// The target store rejected a statement
    Execution,
    /// Network, pool or timeout trouble (retryable)
    Connection,
    /// Voluntary stop observed between statements
    Cancellation,
    /// Invalid configuration
    Configuration,
    /// Reading the source failed
    Io,
    /// Broken invariant inside the loader
    Internal,
}

impl ErrorCategory {
    /// Whether errors in this category are worth another attempt
    #[inline]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Connection)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Encoding => write!(f, "encoding"),
            ErrorCategory::Parse => write!(f, "parse"),
            ErrorCategory::Execution => write!(f, "execution"),
            ErrorCategory::Connection => write!(f, "connection"),
            ErrorCategory::Cancellation => write!(f, "cancellation"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Io => write!(f, "io"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}

/// Main error type for the loader
#[derive(Error, Debug)]
pub enum LoadError {
    /// No encoding, not even a lossy one, could open the file
    #[error("encoding error for {}: {message}", path.display())]
    Encoding { path: PathBuf, message: String },

    /// Statement splitting failed
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Constraint violation (PK, FK, unique, check, not null)
    #[error("constraint violation: {message}")]
    Constraint { message: String },

    /// The target rejected the statement (syntax, unknown table, bad cast)
    #[error("query error: {message}")]
    Query { message: String },

    /// Connection dropped or could not be established
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Statement or acquisition exceeded the configured timeout
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// No pooled connection became available in time
    #[error("pool exhausted: {message}")]
    PoolExhausted { message: String },

    /// A retryable error kept failing until the attempt budget ran out
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<LoadError> },

    /// Cancellation was observed at a statement boundary
    #[error("cancelled")]
    Cancelled,

    /// Configuration rejected by validation
    #[error("configuration error: {message}")]
    Config { message: String },

    /// I/O failure while reading a dump
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Programming invariant violation
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl LoadError {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Encoding { .. } => ErrorCategory::Encoding,
            Self::Parse { .. } => ErrorCategory::Parse,
            Self::Constraint { .. } | Self::Query { .. } | Self::RetriesExhausted { .. } => {
                ErrorCategory::Execution
            }
            Self::Connection { .. } | Self::Timeout { .. } | Self::PoolExhausted { .. } => {
                ErrorCategory::Connection
            }
            Self::Cancelled => ErrorCategory::Cancellation,
            Self::Config { .. } => ErrorCategory::Configuration,
            Self::Io(_) => ErrorCategory::Io,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Whether this error should trigger a retry
    #[inline]
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    pub fn encoding(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Encoding {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint {
            message: message.into(),
        }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    pub fn pool_exhausted(message: impl Into<String>) -> Self {
        Self::PoolExhausted {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_categories() {
        assert!(LoadError::connection("reset by peer").is_retryable());
        assert!(LoadError::timeout("30s elapsed").is_retryable());
        assert!(LoadError::pool_exhausted("0 idle").is_retryable());

        assert!(!LoadError::constraint("duplicate key").is_retryable());
        assert!(!LoadError::query("syntax error").is_retryable());
        assert!(!LoadError::Cancelled.is_retryable());
    }

    #[test]
    fn test_exhausted_retries_are_terminal() {
        let err = LoadError::RetriesExhausted {
            attempts: 3,
            last: Box::new(LoadError::timeout("slow")),
        };
        assert_eq!(err.category(), ErrorCategory::Execution);
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "gave up after 3 attempts: timeout: slow");
    }

    #[test]
    fn test_connection_error_keeps_source() {
        use std::error::Error as _;

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = LoadError::connection_with_source("failed to open DuckDB: reset", io);
        assert!(err.is_retryable());
        assert_eq!(err.source().unwrap().to_string(), "reset");
        assert!(LoadError::connection("refused").source().is_none());
    }

    #[test]
    fn test_encoding_error_display() {
        let err = LoadError::encoding("/dumps/a.sql", "permission denied");
        assert_eq!(
            err.to_string(),
            "encoding error for /dumps/a.sql: permission denied"
        );
    }
}
