//! Transactions on a pooled connection

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use sqlpool_core::{RawTransaction, Result};

use super::{Conn, Statement};

/// An open transaction
///
/// Dereferences to the connection it runs on, so queries can be issued
/// inside the transaction directly. Dropping a transaction without
/// committing or rolling back leaves it to the server to resolve.
pub struct Transaction<'c> {
    conn: &'c mut Conn,
    raw: Arc<dyn RawTransaction>,
}

impl<'c> Transaction<'c> {
    pub(crate) fn new(conn: &'c mut Conn, raw: Arc<dyn RawTransaction>) -> Self {
        Self { conn, raw }
    }

    pub async fn commit(self) -> Result<()> {
        let raw = self.raw;
        self.conn
            .run(move |_| async move { raw.commit().await })
            .await
    }

    pub async fn rollback(self) -> Result<()> {
        let raw = self.raw;
        self.conn
            .run(move |_| async move { raw.rollback().await })
            .await
    }

    /// Prepare `sql` on the connection and bind it to this transaction
    pub async fn bind(&mut self, sql: &str) -> Result<Statement<'_>> {
        let raw = Arc::clone(&self.raw);
        let statement = self.conn.prepare(sql).await?;
        Ok(statement.bind_to(&raw))
    }

    /// Whether the transaction is still attached to an open connection
    pub fn is_valid(&self) -> bool {
        self.raw.is_valid()
    }
}

impl Deref for Transaction<'_> {
    type Target = Conn;

    fn deref(&self) -> &Conn {
        &*self.conn
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut Conn {
        &mut *self.conn
    }
}
