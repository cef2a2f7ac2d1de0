//! Queue Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A queue error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for queue operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Connection, lock or query failure against the jobs table.
    #[display("queue database error")]
    Database,
    #[display("queue database migration error")]
    Migration,
    /// A payload or result could not be converted to or from JSON.
    #[display("invalid job payload")]
    Payload,
    /// The run no longer owns the job: it was removed, finished, or
    /// re-queued and claimed again by a later run.
    #[display("job {id} is not held by run {attempt}")]
    NotHeld { id: i64, attempt: u32 },
    /// The consumer's concurrency limiter was closed underneath it.
    #[display("consumer closed")]
    Closed,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database)
    }
}
