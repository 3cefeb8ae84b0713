//! Result sets read through a pooled connection

use sqlpool_core::{ColumnMeta, RawResult, Result, Row};

use super::Conn;

/// A result set bound to the connection that produced it
///
/// Row reads are not subject to the request timeout, but a fatal error while
/// reading destroys the connection.
pub struct ResultSet<'c> {
    conn: &'c mut Conn,
    raw: Box<dyn RawResult>,
}

impl<'c> ResultSet<'c> {
    pub(crate) fn new(conn: &'c mut Conn, raw: Box<dyn RawResult>) -> Self {
        Self { conn, raw }
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        self.raw.columns()
    }

    pub fn affected_rows(&self) -> u64 {
        self.raw.affected_rows()
    }

    pub fn insert_id(&self) -> u64 {
        self.raw.insert_id()
    }

    /// Read the next row, `None` once the set is exhausted
    pub async fn get_row(&mut self) -> Result<Option<Row>> {
        let outcome = self.raw.get_row().await;
        self.conn.destroy_on_error(outcome).await
    }

    pub async fn get_rows(&mut self) -> Result<Vec<Row>> {
        let outcome = self.raw.get_rows().await;
        self.conn.destroy_on_error(outcome).await
    }

    /// Read the first remaining row and discard the rest
    pub async fn get_first_row(&mut self) -> Result<Option<Row>> {
        let outcome = self.raw.get_first_row().await;
        self.conn.destroy_on_error(outcome).await
    }

    pub async fn get_last_row(&mut self) -> Result<Option<Row>> {
        let outcome = self.raw.get_last_row().await;
        self.conn.destroy_on_error(outcome).await
    }

    /// Discard all unread rows
    pub async fn end(&mut self) -> Result<()> {
        let outcome = self.raw.end().await;
        self.conn.destroy_on_error(outcome).await
    }

    /// Read the next row into `row`
    ///
    /// Fails with [`DbError::EndOfStream`](sqlpool_core::DbError::EndOfStream)
    /// once the set is exhausted, which leaves the connection intact.
    pub async fn scan_row(&mut self, row: &mut Row) -> Result<()> {
        let outcome = self.raw.scan_row(row).await;
        self.conn.destroy_on_error(outcome).await
    }

    /// Advance to the next result set of a multi-statement query
    pub async fn next_result(self) -> Result<Option<ResultSet<'c>>> {
        let Self { conn, mut raw } = self;
        let outcome = raw.next_result().await;
        match conn.destroy_on_error(outcome).await? {
            Some(next) => Ok(Some(ResultSet::new(conn, next))),
            None => Ok(None),
        }
    }
}
