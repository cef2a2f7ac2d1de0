//! Pipeline Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Errors from the mirror, store and queue are wrapped with the subsystem they
//! came from. Whether a retry might help is decided when wrapping, from the
//! underlying error, and carried along so the queue can act on it.

use derive_more::{Display, Error};

/// A pipeline error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of a pipeline failure.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Refreshing or reading the local copy of an upstream failed.
    #[display("repository mirror error")]
    Mirror { retryable: bool },
    /// Reading or writing entries, versions or watermarks failed.
    #[display("store error")]
    Store { retryable: bool },
    /// Enqueueing follow-up jobs failed.
    #[display("queue error")]
    Queue { retryable: bool },
    /// A job payload doesn't match its kind.
    #[display("invalid job payload")]
    Payload,
    /// One of the worker's long-running tasks stopped unexpectedly.
    #[display("worker task failed")]
    Worker,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Mirror { retryable } | Self::Store { retryable } | Self::Queue { retryable } => *retryable,
            Self::Payload | Self::Worker => false,
        }
    }
}

impl ErrorKind {
    /// Wrap a mirror error, keeping its frame as a child in the error tree.
    #[track_caller]
    pub(crate) fn mirror(err: typereg_mirror::error::Error) -> Error {
        let retryable = err.is_retryable();
        err.raise(ErrorKind::Mirror { retryable })
    }

    #[track_caller]
    pub(crate) fn store(err: typereg_store::error::Error) -> Error {
        let retryable = err.is_retryable();
        err.raise(ErrorKind::Store { retryable })
    }

    #[track_caller]
    pub(crate) fn queue(err: typereg_queue::error::Error) -> Error {
        let retryable = err.is_retryable();
        err.raise(ErrorKind::Queue { retryable })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use typereg_mirror::error::ErrorKind as MirrorErrorKind;

    #[test]
    fn test_retryability_follows_the_cause() {
        let err = ErrorKind::mirror(exn::Exn::from(MirrorErrorKind::Network("timed out".to_string())));
        assert!(err.is_retryable());
        let err = ErrorKind::mirror(exn::Exn::from(MirrorErrorKind::InvalidPath("../x".to_string())));
        assert!(!err.is_retryable());
        assert!(!ErrorKind::Payload.is_retryable());
    }
}
