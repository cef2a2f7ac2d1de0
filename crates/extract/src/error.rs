//! Errors for input that can't be turned into package metadata.

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

/// Everything here means "skip this file": none of it is retryable.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The registry document is not valid JSON, or has the wrong shape.
    #[display("malformed registry entry")]
    MalformedEntry,
    /// The path does not belong to a known source namespace.
    #[display("unknown source namespace: {_0}")]
    UnknownSource(#[error(not(source))] String),
    /// A field was found but could not be parsed.
    #[display("failed to parse field '{field}', found value: {value}")]
    ParseError {
        /// The field that failed to parse.
        field: &'static str,
        /// Details about the parsing failure.
        value: String,
    },
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // Input at a given commit never changes, so neither does the outcome.
        false
    }
}
