//! Mirror Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A mirror error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for mirror operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// No `git` executable on the `PATH`.
    #[display("git executable not found")]
    GitNotFound,
    /// The path does not exist (or isn't a file) at that commit.
    #[display("file not found: {path} at {commit}")]
    NotFound {
        #[error(not(source))]
        path: String,
        #[error(not(source))]
        commit: String,
    },
    /// Path contains invalid characters or escapes the repository root
    #[display("invalid path: {_0}")]
    InvalidPath(#[error(not(source))] String),
    /// The commit isn't known to the local copy (yet).
    #[display("unknown revision: {_0}")]
    UnknownRevision(#[error(not(source))] String),
    /// The local copy is missing or unusable and has to be cloned again.
    #[display("local copy is corrupt: {_0}")]
    Corrupt(#[error(not(source))] String),
    /// Talking to the remote failed (clone or fetch).
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// Any other non-zero git exit.
    #[display("git error: {_0}")]
    Git(#[error(not(source))] String),
    /// Spawning git or reading its output failed.
    #[display("I/O error")]
    Io,
    /// Git printed something we couldn't make sense of.
    #[display("unexpected git output: {_0}")]
    InvalidOutput(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UnknownRevision(_) | Self::Corrupt(_) | Self::Network(_) | Self::Io)
    }
}
