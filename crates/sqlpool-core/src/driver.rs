//! Driver traits for the underlying, non-pooled connection
//!
//! The pool never speaks a wire protocol itself. A [`Driver`] instantiates
//! [`RawConnection`]s, and every object a raw connection hands back (result
//! sets, prepared statements, transactions) is exposed through the traits in
//! this module so the pool can wrap it.
//!
//! Raw handles are shared through `Arc` so a pooled connection can run a call
//! on a background task while keeping the ability to close the socket from
//! the caller's task. Implementations must therefore allow [`RawConnection::close`]
//! to be called while another operation is in flight, and that close must
//! abort the in-flight operation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::{ColumnMeta, DbError, Result, Row, Value};


/// Everything a driver needs to open one physical connection
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Transport, e.g. "tcp" or "unix"
    pub protocol: String,
    /// Host:port or socket path
    pub address: String,
    pub username: String,
    pub password: String,
    /// Default database selected after the handshake
    pub database: String,
    /// Limit applied to the connect handshake and to socket I/O by the driver
    pub timeout: Option<Duration>,
}

/// Factory for raw connections
pub trait Driver: Send + Sync + 'static {
    /// Short driver name, e.g. "mysql"
    fn name(&self) -> &'static str;

    /// Instantiate a connection handle without connecting it
    fn new_connection(&self, options: &ConnectOptions) -> Arc<dyn RawConnection>;
}

impl<T: Driver> Driver for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn new_connection(&self, options: &ConnectOptions) -> Arc<dyn RawConnection> {
        (**self).new_connection(options)
    }
}

/// A single physical database connection
///
/// Not re-entrant: callers issue at most one operation at a time, with the
/// exception of [`close`](RawConnection::close).
#[async_trait]
pub trait RawConnection: Send + Sync {
    /// Perform the network handshake
    async fn connect(&self) -> Result<()>;

    /// Close and reopen the connection
    async fn reconnect(&self) -> Result<()>;

    /// Close the connection, aborting any in-flight operation
    async fn close(&self) -> Result<()>;

    /// Whether the connection is currently open
    fn is_connected(&self) -> bool;

    /// Round-trip a ping packet
    async fn ping(&self) -> Result<()>;

    /// Execute a query and read every row of the first result set
    async fn query(&self, sql: &str, params: &[Value]) -> Result<(Vec<Row>, Box<dyn RawResult>)>;

    /// Execute a query and return only its first row
    async fn query_first(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<(Option<Row>, Box<dyn RawResult>)> {
        let (rows, result) = self.query(sql, params).await?;
        Ok((rows.into_iter().next(), result))
    }

    /// Execute a query and return only its last row
    async fn query_last(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<(Option<Row>, Box<dyn RawResult>)> {
        let (rows, result) = self.query(sql, params).await?;
        Ok((rows.into_iter().last(), result))
    }

    /// Start a query whose rows are read through the returned result
    async fn start(&self, sql: &str, params: &[Value]) -> Result<Box<dyn RawResult>>;

    /// Prepare a statement on the server
    async fn prepare(&self, sql: &str) -> Result<Arc<dyn RawStatement>>;

    /// Begin a transaction
    async fn begin(&self) -> Result<Arc<dyn RawTransaction>>;

    /// Select the database subsequent queries run against
    async fn use_database(&self, database: &str) -> Result<()>;
}

/// A result set produced by a query or statement execution
#[async_trait]
pub trait RawResult: Send {
    /// Column metadata of the current result set
    fn columns(&self) -> &[ColumnMeta];

    /// Rows affected by a DML statement
    fn affected_rows(&self) -> u64;

    /// Last auto-increment value generated by the statement
    fn insert_id(&self) -> u64;

    /// Read the next row; `None` once the set is exhausted
    async fn get_row(&mut self) -> Result<Option<Row>>;

    /// Read every remaining row
    async fn get_rows(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.get_row().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Read the first remaining row and discard the rest
    async fn get_first_row(&mut self) -> Result<Option<Row>> {
        let first = self.get_row().await?;
        self.end().await?;
        Ok(first)
    }

    /// Read every remaining row, keeping only the last one
    async fn get_last_row(&mut self) -> Result<Option<Row>> {
        let mut last = None;
        while let Some(row) = self.get_row().await? {
            last = Some(row);
        }
        Ok(last)
    }

    /// Advance to the next result set of a multi-statement query
    async fn next_result(&mut self) -> Result<Option<Box<dyn RawResult>>>;

    /// Discard all unread rows
    async fn end(&mut self) -> Result<()> {
        while self.get_row().await?.is_some() {}
        Ok(())
    }

    /// Read the next row into `row`, failing with [`DbError::EndOfStream`]
    /// once the set is exhausted
    async fn scan_row(&mut self, row: &mut Row) -> Result<()> {
        match self.get_row().await? {
            Some(next) => {
                *row = next;
                Ok(())
            }
            None => Err(DbError::EndOfStream),
        }
    }
}

/// A server-side prepared statement
#[async_trait]
pub trait RawStatement: Send + Sync {
    /// SQL text the statement was prepared from
    fn sql(&self) -> &str;

    /// Execute and read every row of the first result set
    async fn exec(&self, params: &[Value]) -> Result<(Vec<Row>, Box<dyn RawResult>)>;

    /// Execute and return only the first row
    async fn exec_first(&self, params: &[Value]) -> Result<(Option<Row>, Box<dyn RawResult>)> {
        let (rows, result) = self.exec(params).await?;
        Ok((rows.into_iter().next(), result))
    }

    /// Execute and return only the last row
    async fn exec_last(&self, params: &[Value]) -> Result<(Option<Row>, Box<dyn RawResult>)> {
        let (rows, result) = self.exec(params).await?;
        Ok((rows.into_iter().last(), result))
    }

    /// Deallocate the statement on the server
    async fn delete(&self) -> Result<()>;
}

/// An open transaction
#[async_trait]
pub trait RawTransaction: Send + Sync {
    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;

    /// Bind a prepared statement so it executes inside this transaction
    fn bind(&self, statement: Arc<dyn RawStatement>) -> Arc<dyn RawStatement> {
        statement
    }

    /// Whether the transaction is attached to an open connection
    fn is_valid(&self) -> bool;
}
