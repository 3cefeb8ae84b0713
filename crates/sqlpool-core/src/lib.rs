//! sqlpool core - driver abstractions shared by the pool and its drivers
//!
//! This crate defines:
//!
//! - `Driver` / `RawConnection` - the narrow interface to an underlying,
//!   non-pooled database connection
//! - `RawResult`, `RawStatement`, `RawTransaction` - objects a raw connection
//!   hands back
//! - `DbError` - the error type every layer returns, including driver errors
//!   that carry a numeric code
//! - Common types like `Value`, `Row` and `ColumnMeta`

mod driver;
mod error;
mod types;

pub use driver::*;
pub use error::*;
pub use types::*;
