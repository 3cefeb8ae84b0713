//! Pool health checks
//!
//! A health check pings the pool through a leased connection and classifies
//! the latency against [`HealthThresholds`].
//!
//! # Example
//!
//! ```ignore
//! use sqlpool_connection::health::{HealthThresholds, check_pool};
//!
//! let result = check_pool(&pool, &HealthThresholds::new(50, 250)).await;
//! if !result.status.is_usable() {
//!     tracing::error!(error = ?result.error, "database unreachable");
//! }
//! ```

mod check;
mod status;


pub use check::{HealthCheckResult, check_pool};
pub use status::{HealthStatus, HealthThresholds};
