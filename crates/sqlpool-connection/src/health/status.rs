//! Health status classification by ping latency

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Health of a pool as seen by a ping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Healthy,
    /// Working, but slow or contended
    Degraded,
    /// Ping failed or took too long
    Unhealthy,
}

impl HealthStatus {
    /// Classify a latency using the default thresholds
    ///
    /// ```
    /// use sqlpool_connection::health::HealthStatus;
    /// use std::time::Duration;
    ///
    /// assert_eq!(HealthStatus::from_latency(Duration::from_millis(20)), HealthStatus::Healthy);
    /// assert_eq!(HealthStatus::from_latency(Duration::from_millis(300)), HealthStatus::Degraded);
    /// assert_eq!(HealthStatus::from_latency(Duration::from_secs(2)), HealthStatus::Unhealthy);
    /// ```
    pub fn from_latency(latency: Duration) -> Self {
        Self::from_latency_with_thresholds(latency, &HealthThresholds::default())
    }

    pub fn from_latency_with_thresholds(latency: Duration, thresholds: &HealthThresholds) -> Self {
        if latency <= thresholds.healthy_threshold {
            HealthStatus::Healthy
        } else if latency <= thresholds.degraded_threshold {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }

    /// Whether the pool can still serve requests
    pub fn is_usable(&self) -> bool {
        !matches!(self, HealthStatus::Unhealthy)
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Latency limits for [`HealthStatus`] classification
#[derive(Debug, Clone)]
pub struct HealthThresholds {
    /// Maximum latency considered healthy
    pub healthy_threshold: Duration,
    /// Maximum latency considered degraded; anything slower is unhealthy
    pub degraded_threshold: Duration,
}

impl HealthThresholds {
    /// Create thresholds from millisecond limits
    ///
    /// The degraded limit is raised to the healthy limit if it is lower.
    pub fn new(healthy_ms: u64, degraded_ms: u64) -> Self {
        Self {
            healthy_threshold: Duration::from_millis(healthy_ms),
            degraded_threshold: Duration::from_millis(degraded_ms.max(healthy_ms)),
        }
    }
}

impl Default for HealthThresholds {
    /// Healthy up to 100ms, degraded up to 500ms
    fn default() -> Self {
        Self::new(100, 500)
    }
}
