//! Bounded pool of database connections
//!
//! The pool hands out [`Conn`](crate::conn::Conn) leases up to a fixed
//! capacity. Idle connections are verified before reuse, callers wait for a
//! returned connection once the pool is full, and destroying a connection
//! while callers are waiting opens a replacement on their behalf.
//!
//! # Example
//!
//! ```ignore
//! use sqlpool_connection::pool::{Pool, PoolConfig};
//!
//! let config = PoolConfig::new("127.0.0.1:3306", 5)
//!     .with_credentials("app", "secret")
//!     .with_database("inventory")
//!     .with_request_timeout_secs(5);
//!
//! let pool = Pool::new(config, driver);
//! let mut conn = pool.lease().await?;
//! let (rows, _) = conn.query("SELECT id FROM items", &[]).await?;
//! conn.release().await?;
//! ```

mod config;
mod idle;
mod pool;
mod stats;


pub use config::PoolConfig;
pub use pool::Pool;
pub use stats::PoolStats;

pub(crate) use idle::IdleQueue;
pub(crate) use pool::PoolShared;
