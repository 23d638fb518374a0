//! Library Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};
use std::time::Duration;

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a single file could not be scanned.
///
/// The display text ends up verbatim in scan reports, so it is written for
/// people rather than for matching.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The file (or scan root) could not be read.
    #[display("{_0}")]
    Unreadable(#[error(not(source))] String),
    /// The codec rejected the file.
    #[display("{_0}")]
    Decode(#[error(not(source))] String),
    #[display("decoding did not finish within {_0:?}")]
    Timeout(#[error(not(source))] Duration),
    #[display("catalog update failed: {_0}")]
    Catalog(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Catalog(_))
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
