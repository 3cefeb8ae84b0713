//! Pooled connections
//!
//! A [`Conn`] wraps one raw driver connection leased from a
//! [`Pool`](crate::pool::Pool). Every operation runs under the pool's request
//! timeout, and any error that leaves the connection in an unknown state
//! destroys it so it can never be handed out again. Result sets, prepared
//! statements and transactions obtained from a `Conn` borrow it and apply the
//! same rules.

mod classify;
mod result;
mod statement;
mod transaction;


use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};

use sqlpool_core::{DbError, RawConnection, RawStatement, Result, Row, Value};
use tokio::time::Instant;

pub use classify::{FATAL_SERVER_CODES, is_fatal, is_fatal_server_code};
pub use result::ResultSet;
pub use statement::Statement;
pub use transaction::Transaction;

use crate::pool::{PoolConfig, PoolShared};

/// A connection leased from a pool
///
/// Hand it back with [`release`](Conn::release) or discard it with
/// [`destroy`](Conn::destroy). A `Conn` dropped while still pooled is
/// discarded in the background so its slot is freed.
pub struct Conn {
    id: u64,
    raw: Arc<dyn RawConnection>,
    config: Arc<PoolConfig>,
    /// `None` once destroyed or before the pool registered the connection
    pool: Option<Weak<PoolShared>>,
    /// Prepared statements keyed by SQL text
    statements: HashMap<String, Arc<dyn RawStatement>>,
    expires_at: Option<Instant>,
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("id", &self.id)
            .field("pooled", &self.is_pooled())
            .field("cached_statements", &self.statements.len())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Conn {
    pub(crate) fn new(
        id: u64,
        raw: Arc<dyn RawConnection>,
        config: Arc<PoolConfig>,
        expires_at: Option<Instant>,
    ) -> Self {
        Self {
            id,
            raw,
            config,
            pool: None,
            statements: HashMap::new(),
            expires_at,
        }
    }

    pub(crate) fn attach(&mut self, pool: Weak<PoolShared>) {
        self.pool = Some(pool);
    }

    /// Pool-unique connection id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the connection still belongs to a pool
    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }

    /// Instant after which the connection is no longer reused
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Number of prepared statements cached on this connection
    pub fn cached_statements(&self) -> usize {
        self.statements.len()
    }

    /// The underlying driver connection
    pub fn raw(&self) -> &Arc<dyn RawConnection> {
        &self.raw
    }

    /// Connect the raw handle and apply session settings
    ///
    /// On a session setup failure the raw handle is closed again.
    pub(crate) async fn connect(&mut self) -> Result<()> {
        self.raw.connect().await?;
        if let Err(e) = self.prepare_session().await {
            if let Err(close_err) = self.raw.close().await {
                tracing::debug!(conn_id = self.id, error = %close_err, "close after failed session setup");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Close and reopen the connection, then reapply session settings
    ///
    /// Statements cached before the reconnect are forgotten.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.ensure_pooled()?;
        self.statements.clear();
        let outcome = match self.raw.reconnect().await {
            Ok(()) => self.prepare_session().await,
            Err(e) => Err(e),
        };
        self.destroy_on_error(outcome).await
    }

    async fn prepare_session(&self) -> Result<()> {
        let Some(statement) = session_statement(self.config.charset(), self.config.collation())?
        else {
            return Ok(());
        };

        tracing::debug!(conn_id = self.id, %statement, "applying session settings");
        let raw = Arc::clone(&self.raw);
        let setup = async move { raw.query(&statement, &[]).await.map(|_| ()) };
        match self.config.request_timeout() {
            Some(limit) => tokio::time::timeout(limit, setup)
                .await
                .unwrap_or(Err(DbError::RequestTimeout)),
            None => setup.await,
        }
    }

    /// Check whether the connection can still be handed out
    ///
    /// A connection that is disconnected, fails a ping, or has passed its
    /// expiry is destroyed and `false` is returned.
    pub async fn verify(&mut self) -> bool {
        if !self.raw.is_connected() {
            tracing::debug!(conn_id = self.id, "connection closed, discarding");
            self.destroy().await;
            return false;
        }

        let ping = match self.config.request_timeout() {
            Some(limit) => tokio::time::timeout(limit, self.raw.ping())
                .await
                .unwrap_or(Err(DbError::RequestTimeout)),
            None => self.raw.ping().await,
        };
        if let Err(e) = ping {
            tracing::debug!(conn_id = self.id, error = %e, "ping failed, discarding");
            self.destroy().await;
            return false;
        }

        if self.expires_at.is_some_and(|at| Instant::now() > at) {
            tracing::debug!(conn_id = self.id, "connection expired, discarding");
            self.destroy().await;
            return false;
        }

        true
    }

    /// Return the connection to its pool
    ///
    /// With keep-alive enabled a connection that still verifies is queued
    /// for reuse; otherwise it is destroyed. A full idle queue also destroys
    /// the connection.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::ConnectionNotInPool`] if the connection was already
    /// destroyed or its pool no longer exists.
    pub async fn release(mut self) -> Result<()> {
        let Some(shared) = self.pool.as_ref().and_then(Weak::upgrade) else {
            if self.pool.take().is_some() {
                self.close_raw().await;
            }
            return Err(DbError::ConnectionNotInPool);
        };

        if shared.config.keep_connections_alive() && self.verify().await {
            return match shared.idle.try_push(self) {
                Ok(()) => Ok(()),
                Err(mut conn) => {
                    tracing::warn!(conn_id = conn.id, "idle queue full, destroying connection");
                    conn.destroy().await;
                    Ok(())
                }
            };
        }

        self.destroy().await;
        Ok(())
    }

    /// Close the connection and remove it from its pool
    ///
    /// If callers are waiting for a connection, a replacement is opened for
    /// them. Calling `destroy` more than once is a no-op.
    pub async fn destroy(&mut self) {
        self.close_raw().await;

        let Some(pool) = self.pool.take() else {
            return;
        };
        self.statements.clear();

        if let Some(shared) = pool.upgrade() {
            shared.discard(self.id).await;
        }
    }

    async fn close_raw(&self) {
        if self.raw.is_connected() {
            if let Err(e) = self.raw.close().await {
                tracing::debug!(conn_id = self.id, error = %e, "error closing connection");
            }
        }
    }

    fn ensure_pooled(&self) -> Result<()> {
        if self.is_pooled() {
            Ok(())
        } else {
            Err(DbError::ConnectionNotInPool)
        }
    }

    /// Run `work` against the raw connection under the request timeout
    ///
    /// The work runs on its own task. If the timeout elapses first the raw
    /// connection is closed, which aborts the work, the connection is
    /// destroyed and [`DbError::RequestTimeout`] is returned. Without a
    /// request timeout the work is simply awaited.
    pub async fn with_timeout<T, F, Fut>(&mut self, work: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn RawConnection>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let task = tokio::spawn(work(Arc::clone(&self.raw)));

        let Some(limit) = self.config.request_timeout() else {
            return task.await?;
        };

        match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined?,
            Err(_) => {
                tracing::warn!(conn_id = self.id, timeout = ?limit, "request timed out, closing connection");
                self.destroy().await;
                Err(DbError::RequestTimeout)
            }
        }
    }

    /// Destroy the connection if `outcome` holds a fatal error
    ///
    /// The outcome is returned unchanged.
    pub async fn destroy_on_error<T>(&mut self, outcome: Result<T>) -> Result<T> {
        if let Err(e) = &outcome {
            if is_fatal(e) {
                tracing::warn!(conn_id = self.id, error = %e, "fatal error, destroying connection");
                self.destroy().await;
            }
        }
        outcome
    }

    /// Run `work` under the request timeout and destroy on fatal errors
    pub(crate) async fn run<T, F, Fut>(&mut self, work: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn RawConnection>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.ensure_pooled()?;
        let outcome = self.with_timeout(work).await;
        self.destroy_on_error(outcome).await
    }

    /// Execute a query and read every row of its first result set
    pub async fn query(&mut self, sql: &str, params: &[Value]) -> Result<(Vec<Row>, ResultSet<'_>)> {
        let sql = sql.to_owned();
        let params = params.to_vec();
        let (rows, raw) = self
            .run(move |conn| async move { conn.query(&sql, &params).await })
            .await?;
        Ok((rows, ResultSet::new(self, raw)))
    }

    /// Execute a query and return its first row
    pub async fn query_first(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> Result<(Option<Row>, ResultSet<'_>)> {
        let sql = sql.to_owned();
        let params = params.to_vec();
        let (row, raw) = self
            .run(move |conn| async move { conn.query_first(&sql, &params).await })
            .await?;
        Ok((row, ResultSet::new(self, raw)))
    }

    /// Execute a query and return its last row
    pub async fn query_last(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> Result<(Option<Row>, ResultSet<'_>)> {
        let sql = sql.to_owned();
        let params = params.to_vec();
        let (row, raw) = self
            .run(move |conn| async move { conn.query_last(&sql, &params).await })
            .await?;
        Ok((row, ResultSet::new(self, raw)))
    }

    /// Start a query whose rows are read from the returned result set
    pub async fn start(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet<'_>> {
        let sql = sql.to_owned();
        let params = params.to_vec();
        let raw = self
            .run(move |conn| async move { conn.start(&sql, &params).await })
            .await?;
        Ok(ResultSet::new(self, raw))
    }

    /// Prepare a statement, reusing a cached one for the same SQL text
    pub async fn prepare(&mut self, sql: &str) -> Result<Statement<'_>> {
        if let Some(raw) = self.statements.get(sql).cloned() {
            tracing::trace!(conn_id = self.id, sql, "prepared statement cache hit");
            return Ok(Statement::new(self, raw, sql));
        }

        let text = sql.to_owned();
        let raw = self
            .run(move |conn| async move { conn.prepare(&text).await })
            .await?;
        self.statements.insert(sql.to_owned(), Arc::clone(&raw));
        Ok(Statement::new(self, raw, sql))
    }

    /// Begin a transaction
    pub async fn begin(&mut self) -> Result<Transaction<'_>> {
        let raw = self
            .run(|conn| async move { conn.begin().await })
            .await?;
        Ok(Transaction::new(self, raw))
    }

    /// Select the database subsequent queries run against
    pub async fn use_database(&mut self, database: &str) -> Result<()> {
        let database = database.to_owned();
        self.run(move |conn| async move { conn.use_database(&database).await })
            .await
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        let Some(shared) = self.pool.take().and_then(|pool| pool.upgrade()) else {
            return;
        };

        let id = self.id;
        tracing::debug!(conn_id = id, "connection dropped while pooled, discarding");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let raw = Arc::clone(&self.raw);
                handle.spawn(async move {
                    if raw.is_connected() {
                        let _ = raw.close().await;
                    }
                    shared.discard(id).await;
                });
            }
            Err(_) => match shared.state.try_lock() {
                Ok(mut state) => {
                    state.open.remove(&id);
                }
                Err(_) => {
                    tracing::warn!(
                        conn_id = id,
                        "pool busy while dropping connection outside a runtime, slot stays occupied"
                    );
                }
            },
        }
    }
}

/// Statement applying the session character set and collation, if any
pub(crate) fn session_statement(charset: &str, collation: &str) -> Result<Option<String>> {
    match (charset.is_empty(), collation.is_empty()) {
        (true, true) => Ok(None),
        (true, false) => Err(DbError::CollationWithoutCharset),
        (false, true) => Ok(Some(format!("SET NAMES '{}'", charset))),
        (false, false) => Ok(Some(format!("SET NAMES '{}' COLLATE '{}'", charset, collation))),
    }
}
