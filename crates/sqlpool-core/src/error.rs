//! Error types shared by drivers and the pool

use thiserror::Error;

/// Core error type for sqlpool operations
///
/// Drivers report server and client failures through [`DbError::Driver`],
/// which carries the numeric error code the pool uses to decide whether a
/// connection is still usable. Every other variant is a non-driver error.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Timeout reached while waiting for SQL connection (total: {total}, avail: {available}, max: {max})")]
    PoolExhausted {
        total: usize,
        available: usize,
        max: usize,
    },

    #[error("Can't set collation without setting charset")]
    CollationWithoutCharset,

    #[error("Connection not associated with a pool")]
    ConnectionNotInPool,

    #[error("Query took too long to execute")]
    RequestTimeout,

    #[error("Driver error {code}: {message}")]
    Driver { code: u16, message: String },

    /// Result set exhausted; returned while scanning rows past the end.
    #[error("End of stream")]
    EndOfStream,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("{0}")]
    Other(String),
}

impl DbError {
    /// Build a driver error from a numeric code and message
    pub fn driver(code: u16, message: impl Into<String>) -> Self {
        DbError::Driver {
            code,
            message: message.into(),
        }
    }

    /// The driver error code, if this is a driver error
    pub fn code(&self) -> Option<u16> {
        match self {
            DbError::Driver { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether this error was reported by the driver
    pub fn is_driver_error(&self) -> bool {
        matches!(self, DbError::Driver { .. })
    }

    /// Whether this is the end-of-stream marker
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, DbError::EndOfStream)
    }
}

/// Result type alias for sqlpool operations
pub type Result<T> = std::result::Result<T, DbError>;
