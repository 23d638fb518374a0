//! Reader Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};
use std::time::Duration;

/// A reader error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for reader operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// No library item with this id.
    #[display("document not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The session was closed, evicted for inactivity, or never existed.
    /// Open the document again.
    #[display("reading session expired: {_0}")]
    SessionExpired(#[error(not(source))] String),
    #[display("page {page} is out of range (document has {total} pages)")]
    InvalidPage { page: usize, total: usize },
    /// The codec could not open or process the document.
    #[display("cannot decode document: {_0}")]
    DecodeFailure(#[error(not(source))] String),
    /// Gave up waiting; nothing was cached. Retrying may succeed.
    #[display("operation did not finish within {_0:?}")]
    Timeout(#[error(not(source))] Duration),
    /// The document file could not be read.
    #[display("cannot read document: {_0}")]
    Io(#[error(not(source))] String),
    #[display("catalog error: {_0}")]
    Catalog(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Io(_) | Self::Catalog(_))
    }
}

/// Raise `kind`, built from the description of the underlying error, on top
/// of that error.
pub(crate) fn explain<E>(kind: fn(String) -> ErrorKind) -> impl FnOnce(exn::Exn<E>) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    move |err| {
        let reason = (*err).to_string();
        err.raise(kind(reason))
    }
}
