//! Store Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Connection, lock or query failure; usually worth another go.
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// No entry, version or tag matched the lookup.
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// A caller-supplied semver range could not be parsed.
    #[display("invalid semver range: {_0}")]
    InvalidRange(#[error(not(source))] String),
    /// A stored value could not be converted back into its model.
    #[display("invalid store data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database)
    }
}
