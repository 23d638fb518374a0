//! Engine Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Errors from the component crates are raised on top of
//! one of these kinds, so callers only ever match on [`ErrorKind`].

use derive_more::{Display, Error};
use std::time::Duration;

/// An engine error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown document or annotation id.
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The document could not be parsed by its codec.
    #[display("cannot decode document: {_0}")]
    DecodeFailure(#[error(not(source))] String),
    #[display("page {page} is out of range (document has {total} pages)")]
    InvalidPage { page: usize, total: usize },
    /// The reading session is gone. Open the document again.
    #[display("reading session expired: {_0}")]
    SessionExpired(#[error(not(source))] String),
    #[display("operation did not finish within {_0:?}")]
    Timeout(#[error(not(source))] Duration),
    #[display("I/O failure: {_0}")]
    IoFailure(#[error(not(source))] String),
    /// The catalog database failed or holds unusable data.
    #[display("catalog failure: {_0}")]
    Catalog(#[error(not(source))] String),
    #[display("configuration error: {_0}")]
    Config(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::IoFailure(_))
    }
}

pub(crate) fn from_catalog(err: lectern_catalog::error::Error) -> Error {
    use lectern_catalog::error::ErrorKind as Catalog;
    let kind = match &*err {
        Catalog::ItemNotFound(id) | Catalog::AnnotationNotFound(id) => ErrorKind::NotFound(id.clone()),
        other => ErrorKind::Catalog(other.to_string()),
    };
    err.raise(kind)
}

pub(crate) fn from_reader(err: lectern_reader::error::Error) -> Error {
    use lectern_reader::error::ErrorKind as Reader;
    let kind = match &*err {
        Reader::NotFound(id) => ErrorKind::NotFound(id.clone()),
        Reader::SessionExpired(id) => ErrorKind::SessionExpired(id.clone()),
        Reader::InvalidPage { page, total } => ErrorKind::InvalidPage { page: *page, total: *total },
        Reader::DecodeFailure(reason) => ErrorKind::DecodeFailure(reason.clone()),
        Reader::Timeout(limit) => ErrorKind::Timeout(*limit),
        Reader::Io(reason) => ErrorKind::IoFailure(reason.clone()),
        Reader::Catalog(reason) => ErrorKind::Catalog(reason.clone()),
    };
    err.raise(kind)
}

pub(crate) fn from_config(err: lectern_config::error::Error) -> Error {
    let reason = (*err).to_string();
    err.raise(ErrorKind::Config(reason))
}
