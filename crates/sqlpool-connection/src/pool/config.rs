//! Pool configuration types

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use sqlpool_core::ConnectOptions;

/// Configuration for a connection pool
///
/// Carries the credentials handed to the driver for every new connection
/// along with pool sizing, timeouts and session settings. Durations are kept
/// in whole seconds; zero has a per-field meaning documented on each accessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Host:port or socket path of the server
    address: String,
    /// Transport used by the driver ("tcp", "unix", ...)
    protocol: String,
    username: String,
    password: String,
    /// Database selected after connecting
    database: String,
    /// Maximum number of connections allowed in the pool
    #[serde(deserialize_with = "deserialize_max_connections")]
    max_connections: usize,
    /// Maximum age of a connection in seconds before it's recycled
    max_connection_age_secs: u64,
    /// Timeout in seconds for connecting and for waiting on a free connection
    connect_timeout_secs: u64,
    /// Timeout in seconds for a single operation on a connection
    request_timeout_secs: u64,
    /// Return released connections to the pool instead of closing them
    keep_connections_alive: bool,
    charset: String,
    collation: String,
}

impl PoolConfig {
    /// Create a new pool configuration for the given server address
    ///
    /// # Panics
    ///
    /// Panics if `max_connections` is 0.
    pub fn new(address: impl Into<String>, max_connections: usize) -> Self {
        assert!(
            max_connections > 0,
            "max_connections must be greater than 0, got {}",
            max_connections
        );

        Self {
            address: address.into(),
            max_connections,
            ..Self::default()
        }
    }

    /// Set the transport protocol
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Set the login credentials
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the default database
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the maximum connection age in seconds (0 disables expiry)
    pub fn with_max_connection_age_secs(mut self, secs: u64) -> Self {
        self.max_connection_age_secs = secs;
        self
    }

    /// Set the connect timeout in seconds
    pub fn with_connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    /// Set the request timeout in seconds (0 disables the limit)
    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Keep released connections open for reuse
    pub fn with_keep_connections_alive(mut self, keep: bool) -> Self {
        self.keep_connections_alive = keep;
        self
    }

    /// Set the session character set
    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    /// Set the session collation; requires a charset
    pub fn with_collation(mut self, collation: impl Into<String>) -> Self {
        self.collation = collation.into();
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Get the maximum pool size
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Get the maximum connection age, `None` when connections never expire
    pub fn max_connection_age(&self) -> Option<Duration> {
        non_zero_secs(self.max_connection_age_secs)
    }

    /// Get the connect timeout
    ///
    /// Zero means a lease never waits for a connection to be returned and
    /// the driver applies no handshake limit.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get the per-operation timeout, `None` when operations are unbounded
    pub fn request_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.request_timeout_secs)
    }

    pub fn keep_connections_alive(&self) -> bool {
        self.keep_connections_alive
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    pub fn collation(&self) -> &str {
        &self.collation
    }

    /// Options handed to the driver when instantiating a connection
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            protocol: self.protocol.clone(),
            address: self.address.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            timeout: non_zero_secs(self.connect_timeout_secs),
        }
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Applies the sizing rule of [`PoolConfig::new`] to deserialized configs
fn deserialize_max_connections<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let max_connections = usize::deserialize(deserializer)?;
    if max_connections == 0 {
        return Err(serde::de::Error::custom("max_connections must be greater than 0"));
    }
    Ok(max_connections)
}

impl Default for PoolConfig {
    /// Create a default pool configuration
    ///
    /// Defaults:
    /// - protocol: tcp
    /// - max_connections: 10
    /// - max_connection_age: none
    /// - connect_timeout: 10 seconds
    /// - request_timeout: 30 seconds
    /// - keep_connections_alive: true
    fn default() -> Self {
        Self {
            address: "127.0.0.1:3306".to_string(),
            protocol: "tcp".to_string(),
            username: String::new(),
            password: String::new(),
            database: String::new(),
            max_connections: 10,
            max_connection_age_secs: 0,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            keep_connections_alive: true,
            charset: String::new(),
            collation: String::new(),
        }
    }
}
