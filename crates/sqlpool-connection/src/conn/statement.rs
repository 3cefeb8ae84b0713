//! Prepared statements bound to a pooled connection

use std::sync::Arc;

use sqlpool_core::{RawStatement, RawTransaction, Result, Row, Value};

use super::{Conn, ResultSet};

/// A prepared statement cached on its connection
///
/// Executions run under the request timeout and destroy the connection on a
/// fatal error.
pub struct Statement<'c> {
    conn: &'c mut Conn,
    raw: Arc<dyn RawStatement>,
    sql: String,
}

impl<'c> Statement<'c> {
    pub(crate) fn new(conn: &'c mut Conn, raw: Arc<dyn RawStatement>, sql: &str) -> Self {
        Self {
            conn,
            raw,
            sql: sql.to_owned(),
        }
    }

    /// Rebind the statement so it executes inside `transaction`
    pub(crate) fn bind_to(mut self, transaction: &Arc<dyn RawTransaction>) -> Self {
        self.raw = transaction.bind(Arc::clone(&self.raw));
        self
    }

    /// SQL text the statement was prepared from
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub async fn exec(&mut self, params: &[Value]) -> Result<(Vec<Row>, ResultSet<'_>)> {
        let raw = Arc::clone(&self.raw);
        let params = params.to_vec();
        let (rows, result) = self
            .conn
            .run(move |_| async move { raw.exec(&params).await })
            .await?;
        Ok((rows, ResultSet::new(&mut *self.conn, result)))
    }

    pub async fn exec_first(&mut self, params: &[Value]) -> Result<(Option<Row>, ResultSet<'_>)> {
        let raw = Arc::clone(&self.raw);
        let params = params.to_vec();
        let (row, result) = self
            .conn
            .run(move |_| async move { raw.exec_first(&params).await })
            .await?;
        Ok((row, ResultSet::new(&mut *self.conn, result)))
    }

    pub async fn exec_last(&mut self, params: &[Value]) -> Result<(Option<Row>, ResultSet<'_>)> {
        let raw = Arc::clone(&self.raw);
        let params = params.to_vec();
        let (row, result) = self
            .conn
            .run(move |_| async move { raw.exec_last(&params).await })
            .await?;
        Ok((row, ResultSet::new(&mut *self.conn, result)))
    }

    /// Deallocate the statement and drop it from the connection's cache
    pub async fn delete(self) -> Result<()> {
        let outcome = self.raw.delete().await;
        self.conn.destroy_on_error(outcome).await?;
        self.conn.statements.remove(&self.sql);
        Ok(())
    }
}
