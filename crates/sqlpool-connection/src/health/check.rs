//! One-shot pool health checks

use std::time::{Duration, Instant};

use super::status::{HealthStatus, HealthThresholds};
use crate::pool::{Pool, PoolStats};

/// Outcome of a single health check
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    /// Ping latency, if the ping succeeded
    pub latency: Option<Duration>,
    /// Error message if the ping failed
    pub error: Option<String>,
    /// Pool statistics taken right after the ping
    pub stats: PoolStats,
    pub checked_at: Instant,
}

impl HealthCheckResult {
    /// Result of a successful ping
    ///
    /// A pool with callers waiting for a connection is reported as degraded
    /// even when the ping itself was fast.
    pub fn success(latency: Duration, stats: PoolStats, thresholds: &HealthThresholds) -> Self {
        let mut status = HealthStatus::from_latency_with_thresholds(latency, thresholds);
        if status == HealthStatus::Healthy && stats.waiting() > 0 {
            status = HealthStatus::Degraded;
        }

        Self {
            status,
            latency: Some(latency),
            error: None,
            stats,
            checked_at: Instant::now(),
        }
    }

    pub fn failure(error: String, stats: PoolStats) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            latency: None,
            error: Some(error),
            stats,
            checked_at: Instant::now(),
        }
    }
}

/// Ping the pool and classify the result
pub async fn check_pool(pool: &Pool, thresholds: &HealthThresholds) -> HealthCheckResult {
    let ping = pool.ping().await;
    let stats = pool.stats().await;

    let result = match ping {
        Ok(latency) => HealthCheckResult::success(latency, stats, thresholds),
        Err(e) => HealthCheckResult::failure(e.to_string(), stats),
    };

    tracing::debug!(
        status = ?result.status,
        latency = ?result.latency,
        total = stats.total(),
        idle = stats.idle(),
        "pool health check"
    );
    result
}
