//! sqlpool connection - Bounded connection pooling
//!
//! This crate leases pooled connections over any driver implementing
//! [`sqlpool_core::Driver`], enforces per-request timeouts, and destroys
//! connections that hit fatal errors.

pub mod conn;
pub mod health;
pub mod pool;

pub use conn::{Conn, ResultSet, Statement, Transaction, is_fatal, is_fatal_server_code};
pub use health::{HealthCheckResult, HealthStatus, HealthThresholds, check_pool};
pub use pool::{Pool, PoolConfig, PoolStats};
