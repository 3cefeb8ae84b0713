//! Connection pool tests
//!
//! Tests for leasing, releasing and destroying connections, capacity
//! enforcement, waiting callers, replacement of destroyed connections, and
//! concurrent access.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use pretty_assertions::assert_eq;
use rstest::rstest;
use sqlpool_connection::{HealthStatus, Pool};
use sqlpool_core::DbError;

use crate::fixtures::{Failure, MockState, pool, pool_with, test_config, test_pool};

/// Yield until `waiting` callers are blocked in `lease`
async fn wait_for_waiters(pool: &Pool, waiting: usize) {
    for _ in 0..1_000 {
        if pool.stats().await.waiting() == waiting {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("expected {} waiting callers", waiting);
}

/// Yield until the pool holds `total` open connections
async fn wait_for_total(pool: &Pool, total: usize) {
    for _ in 0..1_000 {
        if pool.size().await.0 == total {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("expected {} open connections", total);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_lease_release_destroy_lifecycle(pool: (Pool, Arc<MockState>)) -> Result<()> {
    let (pool, state) = pool;
    let max = pool.config().max_connections();

    let mut leased = Vec::new();
    for i in 0..max {
        leased.push(pool.lease().await?);
        assert_eq!(pool.size().await, (i + 1, 0), "after lease {}", i);
    }

    let err = pool.lease().await.expect_err("pool should be exhausted");
    assert!(
        matches!(err, DbError::PoolExhausted { total: 5, available: 0, max: 5 }),
        "unexpected error: {}",
        err
    );

    for (i, conn) in leased.into_iter().enumerate() {
        conn.release().await?;
        assert_eq!(pool.size().await, (max, i + 1), "after release {}", i);
    }

    for i in 0..max {
        let mut conn = pool.lease().await?;
        assert_eq!(pool.size().await, (max - i, max - i - 1), "after re-lease {}", i);
        conn.destroy().await;
        assert_eq!(pool.size().await, (max - i - 1, max - i - 1), "after destroy {}", i);
    }

    assert_eq!(state.connects(), max);
    assert_eq!(state.closes(), max);
    Ok(())
}

#[rstest]
#[case::single(1)]
#[case::three(3)]
#[case::five(5)]
#[tokio::test(start_paused = true)]
async fn test_exhausted_pool_reports_sizes(#[case] max: usize) -> Result<()> {
    let (pool, _state) = test_pool(max);

    let mut leased = Vec::new();
    for _ in 0..max {
        leased.push(pool.lease().await?);
    }

    let err = pool.lease().await.expect_err("pool should be exhausted");
    assert_eq!(
        err.to_string(),
        format!(
            "Timeout reached while waiting for SQL connection (total: {}, avail: 0, max: {})",
            max, max
        )
    );
    assert_eq!(pool.stats().await.waiting(), 0);
    Ok(())
}

#[tokio::test]
async fn test_zero_connect_timeout_fails_immediately() -> Result<()> {
    let (pool, _state) = pool_with(test_config(1).with_connect_timeout_secs(0));

    let _held = pool.lease().await?;
    let err = pool.lease().await.expect_err("pool should be exhausted");
    assert!(matches!(err, DbError::PoolExhausted { total: 1, available: 0, max: 1 }));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_idle_connection_is_reused(pool: (Pool, Arc<MockState>)) -> Result<()> {
    let (pool, state) = pool;

    let conn = pool.lease().await?;
    let id = conn.id();
    pool.release(conn).await?;

    let conn = pool.lease().await?;
    assert_eq!(conn.id(), id);
    assert_eq!(state.connects(), 1);
    assert!(state.pings() >= 2, "release and lease both verify");
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_release_after_destroy_fails(pool: (Pool, Arc<MockState>)) -> Result<()> {
    let (pool, state) = pool;

    let mut conn = pool.lease().await?;
    conn.destroy().await;
    conn.destroy().await;
    assert!(!conn.is_pooled());

    let err = conn.release().await.expect_err("destroyed connection");
    assert!(matches!(err, DbError::ConnectionNotInPool));
    assert_eq!(pool.size().await, (0, 0));
    assert_eq!(state.closes(), 1);
    Ok(())
}

#[tokio::test]
async fn test_release_without_keep_alive_closes() -> Result<()> {
    let (pool, state) = pool_with(test_config(2).with_keep_connections_alive(false));

    let conn = pool.lease().await?;
    conn.release().await?;

    assert_eq!(pool.size().await, (0, 0));
    assert_eq!(state.closes(), 1);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_unhealthy_idle_connection_is_replaced(pool: (Pool, Arc<MockState>)) -> Result<()> {
    let (pool, state) = pool;

    let conn = pool.lease().await?;
    let stale_id = conn.id();
    conn.release().await?;
    assert_eq!(pool.size().await, (1, 1));

    state.set_fail_ping(true);
    let conn = pool.lease().await?;
    state.set_fail_ping(false);

    assert_ne!(conn.id(), stale_id);
    assert_eq!(state.connects(), 2);
    assert_eq!(state.closes(), 1);
    assert_eq!(pool.size().await, (1, 0));
    Ok(())
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_expired_connection_is_replaced(pool: (Pool, Arc<MockState>)) -> Result<()> {
    let (pool, state) = pool;

    let conn = pool.lease().await?;
    let old_id = conn.id();
    assert!(conn.expires_at().is_some());
    conn.release().await?;

    tokio::time::advance(Duration::from_secs(301)).await;

    let conn = pool.lease().await?;
    assert_ne!(conn.id(), old_id);
    assert_eq!(state.connects(), 2);
    assert_eq!(pool.size().await, (1, 0));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unrepresentable_age_never_expires() -> Result<()> {
    let (pool, state) = pool_with(test_config(1).with_max_connection_age_secs(u64::MAX));

    let conn = pool.lease().await?;
    let id = conn.id();
    assert_eq!(conn.expires_at(), None);
    conn.release().await?;

    tokio::time::advance(Duration::from_secs(86_400)).await;

    let conn = pool.lease().await?;
    assert_eq!(conn.id(), id);
    assert_eq!(state.connects(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_waiter_receives_released_connection() -> Result<()> {
    let (pool, state) = test_pool(1);
    let held = pool.lease().await?;
    let held_id = held.id();

    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.lease().await }
    });
    wait_for_waiters(&pool, 1).await;

    held.release().await?;
    let conn = waiter.await??;

    assert_eq!(conn.id(), held_id);
    assert_eq!(state.connects(), 1);
    assert_eq!(pool.stats().await.waiting(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_destroy_backfills_for_waiter() -> Result<()> {
    let (pool, state) = test_pool(1);
    let mut held = pool.lease().await?;
    let held_id = held.id();

    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.lease().await }
    });
    wait_for_waiters(&pool, 1).await;

    held.destroy().await;
    let conn = waiter.await??;

    assert_ne!(conn.id(), held_id);
    assert_eq!(state.connects(), 2);
    assert_eq!(pool.size().await, (1, 0));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failed_backfill_leaves_waiter_to_time_out() -> Result<()> {
    let (pool, state) = test_pool(1);
    let mut held = pool.lease().await?;

    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.lease().await }
    });
    wait_for_waiters(&pool, 1).await;

    state.set_fail_connect(true);
    held.destroy().await;

    let err = waiter.await?.expect_err("replacement could not be opened");
    assert!(matches!(err, DbError::PoolExhausted { total: 0, available: 0, max: 1 }));
    assert_eq!(pool.stats().await.waiting(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_waiter_is_not_counted() -> Result<()> {
    let (pool, _state) = test_pool(1);
    let _held = pool.lease().await?;

    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.lease().await }
    });
    wait_for_waiters(&pool, 1).await;

    waiter.abort();
    let _ = waiter.await;
    assert_eq!(pool.stats().await.waiting(), 0);
    Ok(())
}

#[tokio::test]
async fn test_dropped_connection_frees_slot() -> Result<()> {
    let (pool, state) = test_pool(1);

    let conn = pool.lease().await?;
    drop(conn);
    wait_for_total(&pool, 0).await;

    let conn = pool.lease().await?;
    assert!(conn.is_pooled());
    assert_eq!(state.connects(), 2);
    assert_eq!(state.closes(), 1);
    Ok(())
}

#[test]
fn test_connection_dropped_outside_runtime_frees_slot() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let (pool, state) = test_pool(1);

    let conn = runtime.block_on(pool.lease())?;
    drop(conn);

    assert_eq!(runtime.block_on(pool.size()), (0, 0));
    let conn = runtime.block_on(pool.lease())?;
    assert!(conn.is_pooled());
    assert_eq!(state.connects(), 2);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_connect_failure_is_not_registered(pool: (Pool, Arc<MockState>)) -> Result<()> {
    let (pool, state) = pool;

    state.set_fail_connect(true);
    let err = pool.lease().await.expect_err("connect should fail");
    assert_eq!(err.code(), Some(2003));
    assert_eq!(pool.size().await, (0, 0));

    state.set_fail_connect(false);
    let conn = pool.lease().await?;
    assert!(conn.is_pooled());
    assert_eq!(pool.size().await, (1, 0));
    Ok(())
}

#[tokio::test]
async fn test_collation_without_charset_rejected() -> Result<()> {
    let (pool, state) = pool_with(test_config(2).with_collation("utf8mb4_bin"));

    let err = pool.lease().await.expect_err("collation needs a charset");
    assert!(matches!(err, DbError::CollationWithoutCharset));
    assert_eq!(pool.size().await, (0, 0));
    assert_eq!(state.connects(), 1);
    assert_eq!(state.closes(), 1);
    Ok(())
}

#[rstest]
#[case::charset_only("utf8mb4", "", "SET NAMES 'utf8mb4'")]
#[case::with_collation(
    "utf8mb4",
    "utf8mb4_unicode_ci",
    "SET NAMES 'utf8mb4' COLLATE 'utf8mb4_unicode_ci'"
)]
#[tokio::test]
async fn test_session_settings_applied(
    #[case] charset: &str,
    #[case] collation: &str,
    #[case] expected: &str,
) -> Result<()> {
    let (pool, state) = pool_with(
        test_config(2)
            .with_charset(charset)
            .with_collation(collation),
    );

    let _conn = pool.lease().await?;
    assert_eq!(state.executed(), vec![expected.to_string()]);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_ping_releases_connection(pool: (Pool, Arc<MockState>)) -> Result<()> {
    let (pool, state) = pool;

    pool.ping().await?;

    assert_eq!(state.executed(), vec!["SELECT 1".to_string()]);
    assert_eq!(pool.size().await, (1, 1));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_ping_with_fatal_error_destroys(pool: (Pool, Arc<MockState>)) -> Result<()> {
    let (pool, state) = pool;

    state.fail_next(Failure::Driver(2006));
    let err = pool.ping().await.expect_err("ping should fail");
    assert_eq!(err.code(), Some(2006));
    assert_eq!(pool.size().await, (0, 0));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_stats(pool: (Pool, Arc<MockState>)) -> Result<()> {
    let (pool, _state) = pool;

    let first = pool.lease().await?;
    let _second = pool.lease().await?;
    first.release().await?;

    let stats = pool.stats().await;
    assert_eq!(stats.total(), 2);
    assert_eq!(stats.idle(), 1);
    assert_eq!(stats.active(), 1);
    assert_eq!(stats.waiting(), 0);
    assert_eq!(stats.max(), 5);
    assert_eq!(stats.headroom(), 3);
    assert_eq!(stats.utilization(), 0.2);
    assert!(!stats.is_full());
    Ok(())
}

#[tokio::test]
async fn test_stats_report_full_pool() -> Result<()> {
    let (pool, _state) = test_pool(1);

    let conn = pool.lease().await?;
    let stats = pool.stats().await;
    assert!(stats.is_full());
    assert_eq!(stats.utilization(), 1.0);

    conn.release().await?;
    assert!(!pool.stats().await.is_full());
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_close_idle(pool: (Pool, Arc<MockState>)) -> Result<()> {
    let (pool, state) = pool;

    let mut leased = Vec::new();
    for _ in 0..3 {
        leased.push(pool.lease().await?);
    }
    let kept = leased.pop().expect("three leases");
    for conn in leased {
        conn.release().await?;
    }
    assert_eq!(pool.size().await, (3, 2));

    assert_eq!(pool.close_idle().await, 2);
    assert_eq!(pool.size().await, (1, 0));
    assert_eq!(state.closes(), 2);
    assert!(kept.is_pooled());
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_health_check(pool: (Pool, Arc<MockState>)) -> Result<()> {
    let (pool, state) = pool;

    let healthy = pool.health_check().await;
    assert_eq!(healthy.status, HealthStatus::Healthy);
    assert!(healthy.latency.is_some());
    assert_eq!(healthy.stats.total(), 1);

    state.fail_next(Failure::Driver(2013));
    let unhealthy = pool.health_check().await;
    assert_eq!(unhealthy.status, HealthStatus::Unhealthy);
    assert!(unhealthy.error.is_some());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lease_release_and_destroy() -> Result<()> {
    let (pool, _state) = pool_with(test_config(5).with_connect_timeout_secs(30));
    let max = pool.config().max_connections();

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..8 * max {
        let pool = pool.clone();
        tasks.spawn(async move {
            let mut conn = pool.lease().await?;
            tokio::time::sleep(Duration::from_millis(5)).await;

            let (total, idle) = pool.size().await;
            assert!(total <= max, "{} open connections exceed {}", total, max);
            assert!(idle <= total);

            if i % 2 == 0 {
                conn.release().await?;
            } else {
                conn.destroy().await;
            }
            anyhow::Ok(())
        });
    }

    while let Some(joined) = tasks.join_next().await {
        joined??;
    }

    let (total, idle) = pool.size().await;
    assert!(total <= max);
    assert_eq!(total, idle);
    assert_eq!(pool.stats().await.waiting(), 0);

    let conn = pool.lease().await?;
    conn.release().await?;
    Ok(())
}
