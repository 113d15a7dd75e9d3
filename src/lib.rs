//! Streaming, parallel loader for legacy SQL dumps.
//!
//! A dump is decoded in one committed encoding, split into statements,
//! rewritten into the target dialect, and executed by a pool of workers,
//! each statement in its own transaction. See [`pipeline::Loader`].

pub mod config;
pub mod error;
pub mod logging;
pub mod parser;
pub mod pipeline;
pub mod progress;
pub mod reader;
pub mod rewrite;
pub mod store;

pub use error::{LoadError, Result};
