//! Connection pool implementation

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use sqlpool_core::{DbError, Driver, Result};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::config::PoolConfig;
use super::idle::IdleQueue;
use super::stats::PoolStats;
use crate::conn::Conn;
use crate::health::{HealthCheckResult, HealthThresholds, check_pool};

/// Membership of the pool, guarded by the pool lock
pub(crate) struct PoolState {
    /// Ids of every open connection, leased or idle
    pub(crate) open: HashSet<u64>,
}

/// State shared between a [`Pool`] and the connections it hands out
pub(crate) struct PoolShared {
    pub(crate) config: Arc<PoolConfig>,
    driver: Arc<dyn Driver>,
    /// Held across connection creation so membership never exceeds capacity
    pub(crate) state: Mutex<PoolState>,
    pub(crate) idle: IdleQueue<Conn>,
    /// Callers currently blocked waiting for a returned connection
    pub(crate) pending: AtomicUsize,
    next_id: AtomicU64,
}

impl PoolShared {
    /// Open a new connection and register it with the pool
    ///
    /// Takes the locked pool state so the capacity check made by the caller
    /// and the registration happen under the same lock. A connection that
    /// fails to connect or to set up its session is never registered.
    pub(crate) async fn create_connection(self: &Arc<Self>, state: &mut PoolState) -> Result<Conn> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let raw = self.driver.new_connection(&self.config.connect_options());
        // An age past the end of the clock never expires
        let expires_at = self
            .config
            .max_connection_age()
            .and_then(|age| Instant::now().checked_add(age));

        let mut conn = Conn::new(id, raw, Arc::clone(&self.config), expires_at);
        if let Err(e) = conn.connect().await {
            tracing::warn!(conn_id = id, error = %e, "failed to open connection");
            return Err(e);
        }

        conn.attach(Arc::downgrade(self));
        state.open.insert(id);
        tracing::debug!(
            conn_id = id,
            total = state.open.len(),
            max = self.config.max_connections(),
            "opened connection"
        );
        Ok(conn)
    }

    /// Drop a connection from the pool membership
    ///
    /// If callers are waiting, a replacement connection is opened and queued
    /// for them. Failing to open the replacement is logged and swallowed; the
    /// waiters then time out on their own.
    pub(crate) async fn discard(self: &Arc<Self>, id: u64) {
        let mut state = self.state.lock().await;
        if !state.open.remove(&id) {
            return;
        }
        tracing::debug!(conn_id = id, total = state.open.len(), "connection left the pool");

        if self.pending.load(Ordering::SeqCst) == 0 {
            return;
        }

        match self.create_connection(&mut state).await {
            Ok(replacement) => {
                if let Err(replacement) = self.idle.try_push(replacement) {
                    tracing::warn!(
                        conn_id = replacement.id(),
                        "idle queue full, dropping replacement connection"
                    );
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to open replacement connection for waiting callers");
            }
        }
    }
}

/// Counts a caller blocked in [`Pool::lease`] until it stops waiting
///
/// Dropping the guard also covers a lease future that is cancelled while
/// waiting.
struct PendingGuard<'a>(&'a AtomicUsize);

impl<'a> PendingGuard<'a> {
    fn register(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A bounded pool of database connections
///
/// Cloning the pool is cheap; clones share the same connections.
#[derive(Clone)]
pub struct Pool {
    shared: Arc<PoolShared>,
}

impl Pool {
    /// Create a new, empty pool
    ///
    /// No connection is opened until the first lease.
    pub fn new(config: PoolConfig, driver: impl Driver) -> Self {
        tracing::info!(
            driver = driver.name(),
            address = config.address(),
            max_connections = config.max_connections(),
            "creating connection pool"
        );

        let capacity = config.max_connections();
        Self {
            shared: Arc::new(PoolShared {
                config: Arc::new(config),
                driver: Arc::new(driver),
                state: Mutex::new(PoolState {
                    open: HashSet::with_capacity(capacity),
                }),
                idle: IdleQueue::new(capacity),
                pending: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Get the pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Lease a connection
    ///
    /// Reuses a verified idle connection when one is available, opens a new
    /// one while the pool is below capacity, and otherwise waits up to the
    /// connect timeout for a connection to be returned.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::PoolExhausted`] if no connection became available
    /// in time, or the driver's error if opening a connection failed.
    #[tracing::instrument(skip(self))]
    pub async fn lease(&self) -> Result<Conn> {
        loop {
            if let Some(mut conn) = self.shared.idle.try_pop() {
                if conn.verify().await {
                    tracing::trace!(conn_id = conn.id(), "reusing idle connection");
                    return Ok(conn);
                }
                continue;
            }

            let pending = {
                let mut state = self.shared.state.lock().await;
                if state.open.len() < self.shared.config.max_connections() {
                    return self.shared.create_connection(&mut state).await;
                }
                PendingGuard::register(&self.shared.pending)
            };

            let timeout = self.shared.config.connect_timeout();
            tracing::trace!(?timeout, "pool full, waiting for a connection");
            let returned = self.shared.idle.pop_timeout(timeout).await;
            drop(pending);

            match returned {
                Some(mut conn) => {
                    if conn.verify().await {
                        return Ok(conn);
                    }
                }
                None => {
                    let (total, available) = self.size().await;
                    tracing::warn!(total, available, "timed out waiting for a connection");
                    return Err(DbError::PoolExhausted {
                        total,
                        available,
                        max: self.shared.config.max_connections(),
                    });
                }
            }
        }
    }

    /// Return a connection to the pool
    ///
    /// Equivalent to [`Conn::release`].
    pub async fn release(&self, conn: Conn) -> Result<()> {
        conn.release().await
    }

    /// Number of open connections and number of idle connections
    pub async fn size(&self) -> (usize, usize) {
        let state = self.shared.state.lock().await;
        (state.open.len(), self.shared.idle.len())
    }

    /// Get a snapshot of the pool statistics
    pub async fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock().await;
        PoolStats::capture(&self.shared, &state)
    }

    /// Lease a connection, run `SELECT 1` and release it
    ///
    /// Returns the time the query took, excluding the lease itself.
    #[tracing::instrument(skip(self))]
    pub async fn ping(&self) -> Result<Duration> {
        let mut conn = self.lease().await?;

        let start = Instant::now();
        let outcome = conn.query("SELECT 1", &[]).await.map(|_| ());
        let latency = start.elapsed();

        if conn.is_pooled() {
            if let Err(e) = conn.release().await {
                tracing::debug!(error = %e, "failed to release ping connection");
            }
        }

        outcome.map(|()| latency)
    }

    /// Check the pool's health using the default latency thresholds
    pub async fn health_check(&self) -> HealthCheckResult {
        check_pool(self, &HealthThresholds::default()).await
    }

    /// Close every idle connection
    ///
    /// Leased connections are unaffected.
    pub async fn close_idle(&self) -> usize {
        let drained = self.shared.idle.drain();
        let closed = drained.len();
        for mut conn in drained {
            conn.destroy().await;
        }
        if closed > 0 {
            tracing::debug!(closed, "closed idle connections");
        }
        closed
    }
}
