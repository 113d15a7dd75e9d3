//! DuckDB backend.

use super::{ConnectionPool, StoreConnection};
use crate::error::{LoadError, Result};
use duckdb::Connection;
use std::path::Path;
use std::sync::Mutex;

const CONNECTION_MARKERS: &[&str] = &[
    "IO Error",
    "Connection Error",
    "INTERRUPT Error",
    "Interrupted",
    "database is locked",
];

/// Map a DuckDB error onto the loader's taxonomy by its message prefix.
pub fn classify_error(err: duckdb::Error) -> LoadError {
    let message = err.to_string();
    if message.contains("Constraint Error") {
        LoadError::constraint(message)
    } else if CONNECTION_MARKERS.iter().any(|m| message.contains(m)) {
        LoadError::connection(message)
    } else {
        LoadError::query(message)
    }
}

pub struct DuckDbConnection {
    conn: Connection,
}

impl DuckDbConnection {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

impl StoreConnection for DuckDbConnection {
    fn execute(&mut self, sql: &str) -> Result<usize> {
        self.conn.execute(sql, []).map_err(classify_error)
    }

    fn begin(&mut self) -> Result<()> {
        self.conn
            .execute_batch("BEGIN TRANSACTION")
            .map_err(classify_error)
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT").map_err(classify_error)
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK").map_err(classify_error)
    }
}

/// Open a database file, or an in-memory database when `path` is `None`.
pub fn open_duckdb(path: Option<&Path>) -> Result<Connection> {
    let opened = match path {
        Some(p) => Connection::open(p),
        None => Connection::open_in_memory(),
    };
    opened.map_err(|e| LoadError::connection_with_source(format!("failed to open DuckDB: {}", e), e))
}

/// Create `schema` if it is missing and make it the default for unqualified
/// names on `conn`, so setup DDL lands where rewritten statements point.
pub fn use_schema(conn: &Connection, schema: &str) -> Result<()> {
    let quoted = schema.replace('"', "\"\"");
    let literal = schema.replace('\'', "''");
    conn.execute_batch(&format!(
        "CREATE SCHEMA IF NOT EXISTS \"{}\"; SET schema = '{}';",
        quoted, literal
    ))
    .map_err(classify_error)
}

/// Pool connections cloned from one opened database, so every worker writes
/// to the same catalog.
pub fn duckdb_pool(conn: Connection, max_size: usize) -> ConnectionPool<DuckDbConnection> {
    let base = Mutex::new(conn);
    ConnectionPool::new(max_size, move || {
        let base = base
            .lock()
            .map_err(|_| LoadError::internal("DuckDB base connection lock poisoned"))?;
        base.try_clone().map(DuckDbConnection::new).map_err(|e| {
            LoadError::connection_with_source(format!("failed to clone DuckDB connection: {}", e), e)
        })
    })
}
