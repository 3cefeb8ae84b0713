//! Pool statistics types

use std::sync::atomic::Ordering;

use serde::{Deserialize, Serialize};

use super::pool::{PoolShared, PoolState};

/// Snapshot of a pool's membership, idle queue and waiters
///
/// Leased connections are never tracked directly; they are the open
/// connections that are not sitting in the idle queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolStats {
    /// Open connections, leased or idle
    total: usize,
    idle: usize,
    /// Callers blocked in a lease
    waiting: usize,
    /// Configured maximum number of open connections
    max: usize,
}

impl PoolStats {
    pub fn new(total: usize, idle: usize, waiting: usize, max: usize) -> Self {
        Self {
            total,
            idle,
            waiting,
            max,
        }
    }

    /// Take a snapshot while the pool lock is held
    ///
    /// Holding the lock keeps `total` and `waiting` consistent with each
    /// other, since both only change under it.
    pub(crate) fn capture(shared: &PoolShared, state: &PoolState) -> Self {
        Self::new(
            state.open.len(),
            shared.idle.len(),
            shared.pending.load(Ordering::SeqCst),
            shared.config.max_connections(),
        )
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn idle(&self) -> usize {
        self.idle
    }

    /// Connections currently handed out to callers
    pub fn active(&self) -> usize {
        self.total.saturating_sub(self.idle)
    }

    pub fn waiting(&self) -> usize {
        self.waiting
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Connections that can still be opened before leases start waiting
    pub fn headroom(&self) -> usize {
        self.max.saturating_sub(self.total)
    }

    /// Fraction of the pool's capacity that is leased, 0.0 for an empty pool
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            0.0
        } else {
            self.active() as f64 / self.max as f64
        }
    }

    /// True when the next lease would have to wait for a release
    pub fn is_full(&self) -> bool {
        self.idle == 0 && self.headroom() == 0
    }
}
