//! Bounded blocking connection pool.
//!
//! Connections are created lazily by a factory up to `max_size`, kept in a
//! LIFO idle list, and handed out as [`PooledConnection`] guards that return
//! them on drop.

use super::StoreConnection;
use crate::error::{LoadError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

type Factory<C> = dyn Fn() -> Result<C> + Send + Sync;

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub connections_created: u64,
    pub acquisitions: u64,
    pub exhausted_count: u64,
    pub discarded: u64,
}

#[derive(Debug, Default)]
struct AtomicPoolStats {
    connections_created: AtomicU64,
    acquisitions: AtomicU64,
    exhausted_count: AtomicU64,
    discarded: AtomicU64,
}

struct PoolState<C> {
    idle: Vec<C>,
    total: usize,
}

pub struct ConnectionPool<C> {
    factory: Box<Factory<C>>,
    max_size: usize,
    state: Mutex<PoolState<C>>,
    available: Condvar,
    stats: AtomicPoolStats,
}

impl<C: StoreConnection> ConnectionPool<C> {
    pub fn new<F>(max_size: usize, factory: F) -> Self
    where
        F: Fn() -> Result<C> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            max_size: max_size.max(1),
            state: Mutex::new(PoolState {
                idle: Vec::with_capacity(max_size),
                total: 0,
            }),
            available: Condvar::new(),
            stats: AtomicPoolStats::default(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, PoolState<C>>> {
        self.state
            .lock()
            .map_err(|_| LoadError::internal("connection pool lock poisoned"))
    }

    /// Borrow a connection, waiting up to `timeout` for one to free up.
    pub fn acquire(&self, timeout: Duration) -> Result<PooledConnection<'_, C>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock()?;

        loop {
            if let Some(conn) = state.idle.pop() {
                self.stats.acquisitions.fetch_add(1, Ordering::Relaxed);
                return Ok(PooledConnection::new(self, conn));
            }

            if state.total < self.max_size {
                state.total += 1;
                drop(state);
                return match (self.factory)() {
                    Ok(conn) => {
                        self.stats.connections_created.fetch_add(1, Ordering::Relaxed);
                        self.stats.acquisitions.fetch_add(1, Ordering::Relaxed);
                        debug!(max_size = self.max_size, "opened pooled connection");
                        Ok(PooledConnection::new(self, conn))
                    }
                    Err(e) => {
                        self.forget();
                        Err(e)
                    }
                };
            }

            let now = Instant::now();
            if now >= deadline {
                self.stats.exhausted_count.fetch_add(1, Ordering::Relaxed);
                return Err(LoadError::pool_exhausted(format!(
                    "no connection available within {:?} ({} in use)",
                    timeout, state.total
                )));
            }

            let (guard, _) = self
                .available
                .wait_timeout(state, deadline - now)
                .map_err(|_| LoadError::internal("connection pool lock poisoned"))?;
            state = guard;
        }
    }

    fn release(&self, conn: C) {
        if let Ok(mut state) = self.state.lock() {
            state.idle.push(conn);
        }
        self.available.notify_one();
    }

    fn forget(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.total = state.total.saturating_sub(1);
        }
        self.available.notify_one();
    }

    /// Connections currently open, idle or borrowed
    pub fn size(&self) -> usize {
        self.state.lock().map_or(0, |s| s.total)
    }

    pub fn idle(&self) -> usize {
        self.state.lock().map_or(0, |s| s.idle.len())
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            connections_created: self.stats.connections_created.load(Ordering::Relaxed),
            acquisitions: self.stats.acquisitions.load(Ordering::Relaxed),
            exhausted_count: self.stats.exhausted_count.load(Ordering::Relaxed),
            discarded: self.stats.discarded.load(Ordering::Relaxed),
        }
    }
}

/// A connection borrowed from the pool, returned when dropped.
pub struct PooledConnection<'a, C: StoreConnection> {
    conn: Option<C>,
    pool: &'a ConnectionPool<C>,
}

impl<'a, C: StoreConnection> PooledConnection<'a, C> {
    fn new(pool: &'a ConnectionPool<C>, conn: C) -> Self {
        Self {
            conn: Some(conn),
            pool,
        }
    }

    /// Close a broken connection instead of returning it to the pool.
    pub fn discard(mut self) {
        if self.conn.take().is_some() {
            self.pool.stats.discarded.fetch_add(1, Ordering::Relaxed);
            self.pool.forget();
        }
    }

    fn conn_mut(&mut self) -> Result<&mut C> {
        self.conn
            .as_mut()
            .ok_or_else(|| LoadError::internal("pooled connection used after discard"))
    }
}

impl<C: StoreConnection> StoreConnection for PooledConnection<'_, C> {
    fn execute(&mut self, sql: &str) -> Result<usize> {
        self.conn_mut()?.execute(sql)
    }

    fn begin(&mut self) -> Result<()> {
        self.conn_mut()?.begin()
    }

    fn commit(&mut self) -> Result<()> {
        self.conn_mut()?.commit()
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn_mut()?.rollback()
    }
}

impl<C: StoreConnection> Drop for PooledConnection<'_, C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
