//! Target store abstraction.
//!
//! Workers only see [`StoreConnection`]; the pool hands out connections and
//! owns all locking. The bundled backend is DuckDB.

pub mod duckdb;
mod pool;

pub use self::duckdb::{duckdb_pool, open_duckdb, use_schema, DuckDbConnection};
pub use pool::{ConnectionPool, PoolStats, PooledConnection};

use crate::error::Result;

/// A connection that can run one statement in its own transaction.
pub trait StoreConnection: Send {
    /// Run a statement and return the affected row count
    fn execute(&mut self, sql: &str) -> Result<usize>;

    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;
}

impl<C: StoreConnection + ?Sized> StoreConnection for Box<C> {
    fn execute(&mut self, sql: &str) -> Result<usize> {
        (**self).execute(sql)
    }

    fn begin(&mut self) -> Result<()> {
        (**self).begin()
    }

    fn commit(&mut self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<()> {
        (**self).rollback()
    }
}
