//! Scriptable in-memory driver and pool fixtures
//!
//! [`MockDriver`] hands out connections that never touch the network. All
//! connections created by one driver share a [`MockState`], through which a
//! test can inject failures, slow every operation down, preset result rows,
//! and inspect what the pool did (connects, closes, pings, executed SQL).
//!
//! Injected failures are consumed by the next operation of any connection,
//! in the order they were queued.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sqlpool_tests::fixtures::{Failure, test_pool};
//!
//! let (pool, state) = test_pool(5);
//! let mut conn = pool.lease().await?;
//! state.fail_next(Failure::Driver(2006));
//! assert!(conn.query("SELECT 1", &[]).await.is_err());
//! assert!(!conn.is_pooled());
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rstest::fixture;
use sqlpool_connection::{Pool, PoolConfig};
use sqlpool_core::{
    ColumnMeta, ConnectOptions, DbError, Driver, RawConnection, RawResult, RawStatement,
    RawTransaction, Result, Row, Value,
};

/// A failure injected into the next mock operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Driver error with the given server or client code
    Driver(u16),
    EndOfStream,
    /// Error without a driver code
    Other(&'static str),
}

impl Failure {
    pub fn into_error(self) -> DbError {
        match self {
            Failure::Driver(code) => DbError::driver(code, format!("mock error {}", code)),
            Failure::EndOfStream => DbError::EndOfStream,
            Failure::Other(message) => DbError::Other(message.to_string()),
        }
    }
}

/// Preset rows returned for a SQL text
#[derive(Debug, Clone)]
struct Preset {
    columns: Arc<[String]>,
    rows: Vec<Vec<Value>>,
}

/// State shared by every connection of one [`MockDriver`]
pub struct MockState {
    connects: AtomicUsize,
    closes: AtomicUsize,
    pings: AtomicUsize,
    prepares: AtomicUsize,
    deletes: AtomicUsize,
    fail_connect: AtomicBool,
    fail_ping: AtomicBool,
    delay: Mutex<Duration>,
    failures: Mutex<VecDeque<Failure>>,
    executed: Mutex<Vec<String>>,
    presets: Mutex<HashMap<String, Preset>>,
}

impl Default for MockState {
    fn default() -> Self {
        let state = Self {
            connects: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            prepares: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
            fail_ping: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
            failures: Mutex::new(VecDeque::new()),
            executed: Mutex::new(Vec::new()),
            presets: Mutex::new(HashMap::new()),
        };
        state.set_rows("SELECT 1", &["1"], vec![vec![Value::Int(1)]]);
        state
    }
}

impl MockState {
    /// Queue a failure for the next operation
    pub fn fail_next(&self, failure: Failure) {
        self.failures.lock().push_back(failure);
    }

    /// Delay every data operation and transaction end by `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_ping(&self, fail: bool) {
        self.fail_ping.store(fail, Ordering::SeqCst);
    }

    /// Preset the rows returned for `sql`
    pub fn set_rows(&self, sql: &str, columns: &[&str], rows: Vec<Vec<Value>>) {
        let columns: Arc<[String]> = columns.iter().map(|c| c.to_string()).collect();
        self.presets
            .lock()
            .insert(sql.to_string(), Preset { columns, rows });
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn prepares(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Every SQL text executed so far, in order
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    fn take_failure(&self) -> Result<()> {
        match self.failures.lock().pop_front() {
            Some(failure) => Err(failure.into_error()),
            None => Ok(()),
        }
    }

    fn record(&self, sql: impl Into<String>) {
        self.executed.lock().push(sql.into());
    }

    fn result_for(self: &Arc<Self>, sql: &str) -> MockResult {
        let preset = self.presets.lock().get(sql).cloned();
        let (columns, rows) = match preset {
            Some(preset) => (preset.columns, preset.rows),
            None => (Arc::from(Vec::<String>::new()), Vec::new()),
        };

        MockResult {
            state: Arc::clone(self),
            meta: columns
                .iter()
                .map(|name| ColumnMeta {
                    name: name.clone(),
                    data_type: "INT".to_string(),
                    nullable: true,
                })
                .collect(),
            rows: rows
                .into_iter()
                .map(|values| Row::new(Arc::clone(&columns), values))
                .collect(),
            affected_rows: 0,
        }
    }
}

/// Driver whose connections live entirely in memory
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }
}

impl Driver for MockDriver {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn new_connection(&self, _options: &ConnectOptions) -> Arc<dyn RawConnection> {
        Arc::new(MockConnection {
            state: Arc::clone(&self.state),
            connected: AtomicBool::new(false),
        })
    }
}

/// A connection of [`MockDriver`]
///
/// Closing it while an operation sleeps makes that operation fail with a
/// lost-connection error once it wakes up.
pub struct MockConnection {
    state: Arc<MockState>,
    connected: AtomicBool,
}

impl MockConnection {
    /// Common path of every data operation
    async fn round_trip(&self, sql: &str) -> Result<()> {
        self.state.record(sql);
        let delay = *self.state.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DbError::driver(2013, "Lost connection to MySQL server during query"));
        }
        self.state.take_failure()
    }
}

#[async_trait]
impl RawConnection for MockConnection {
    async fn connect(&self) -> Result<()> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(DbError::driver(2003, "Can't connect to MySQL server"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn reconnect(&self) -> Result<()> {
        self.close().await?;
        self.connect().await
    }

    async fn close(&self) -> Result<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> Result<()> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        if !self.is_connected() || self.state.fail_ping.load(Ordering::SeqCst) {
            return Err(DbError::driver(2006, "MySQL server has gone away"));
        }
        Ok(())
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> Result<(Vec<Row>, Box<dyn RawResult>)> {
        self.round_trip(sql).await?;
        let mut result = self.state.result_for(sql);
        let rows: Vec<Row> = result.rows.drain(..).collect();
        let result: Box<dyn RawResult> = Box::new(result);
        Ok((rows, result))
    }

    async fn start(&self, sql: &str, _params: &[Value]) -> Result<Box<dyn RawResult>> {
        self.round_trip(sql).await?;
        Ok(Box::new(self.state.result_for(sql)))
    }

    async fn prepare(&self, sql: &str) -> Result<Arc<dyn RawStatement>> {
        self.round_trip(&format!("PREPARE {}", sql)).await?;
        self.state.prepares.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockStatement {
            state: Arc::clone(&self.state),
            sql: sql.to_string(),
        }))
    }

    async fn begin(&self) -> Result<Arc<dyn RawTransaction>> {
        self.round_trip("BEGIN").await?;
        Ok(Arc::new(MockTransaction {
            state: Arc::clone(&self.state),
            open: AtomicBool::new(true),
        }))
    }

    async fn use_database(&self, database: &str) -> Result<()> {
        self.round_trip(&format!("USE {}", database)).await
    }
}

/// Result set over preset rows
pub struct MockResult {
    state: Arc<MockState>,
    meta: Vec<ColumnMeta>,
    rows: VecDeque<Row>,
    affected_rows: u64,
}

#[async_trait]
impl RawResult for MockResult {
    fn columns(&self) -> &[ColumnMeta] {
        &self.meta
    }

    fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    fn insert_id(&self) -> u64 {
        0
    }

    async fn get_row(&mut self) -> Result<Option<Row>> {
        self.state.take_failure()?;
        Ok(self.rows.pop_front())
    }

    async fn next_result(&mut self) -> Result<Option<Box<dyn RawResult>>> {
        self.state.take_failure()?;
        Ok(None)
    }
}

pub struct MockStatement {
    state: Arc<MockState>,
    sql: String,
}

#[async_trait]
impl RawStatement for MockStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    async fn exec(&self, _params: &[Value]) -> Result<(Vec<Row>, Box<dyn RawResult>)> {
        self.state.record(format!("EXECUTE {}", self.sql));
        let delay = *self.state.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state.take_failure()?;

        let mut result = self.state.result_for(&self.sql);
        let rows: Vec<Row> = result.rows.drain(..).collect();
        let result: Box<dyn RawResult> = Box::new(result);
        Ok((rows, result))
    }

    async fn delete(&self) -> Result<()> {
        self.state.take_failure()?;
        self.state.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockTransaction {
    state: Arc<MockState>,
    open: AtomicBool,
}

impl MockTransaction {
    async fn finish(&self, sql: &str) -> Result<()> {
        self.state.record(sql);
        let delay = *self.state.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state.take_failure()?;
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl RawTransaction for MockTransaction {
    async fn commit(&self) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(&self) -> Result<()> {
        self.finish("ROLLBACK").await
    }

    fn bind(&self, statement: Arc<dyn RawStatement>) -> Arc<dyn RawStatement> {
        self.state.record(format!("BIND {}", statement.sql()));
        statement
    }

    fn is_valid(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Pool settings used throughout the suite
///
/// Connections live for five minutes, leases wait up to two seconds and
/// requests may take up to five seconds.
pub fn test_config(max_connections: usize) -> PoolConfig {
    PoolConfig::new("mock:3306", max_connections)
        .with_credentials("test", "test")
        .with_database("test")
        .with_max_connection_age_secs(300)
        .with_connect_timeout_secs(2)
        .with_request_timeout_secs(5)
        .with_keep_connections_alive(true)
}

/// Pool over a fresh [`MockDriver`]
pub fn pool_with(config: PoolConfig) -> (Pool, Arc<MockState>) {
    initialize_logging();
    let driver = MockDriver::new();
    let state = driver.state();
    (Pool::new(config, driver), state)
}

/// Pool of `max_connections` built from [`test_config`]
pub fn test_pool(max_connections: usize) -> (Pool, Arc<MockState>) {
    pool_with(test_config(max_connections))
}

/// Five-connection pool fixture
#[fixture]
pub fn pool() -> (Pool, Arc<MockState>) {
    test_pool(5)
}

static LOGGING: Lazy<()> = Lazy::new(|| {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sqlpool_connection=debug,sqlpool_tests=debug"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
});

/// Initialize logging for tests if not already initialized
pub fn initialize_logging() {
    Lazy::force(&LOGGING);
}
