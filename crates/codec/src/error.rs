//! Codec Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// A codec error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The bytes could not be parsed as the claimed format. Don't retry with
    /// the same input.
    #[display("cannot decode document: {_0}")]
    Decode(#[error(not(source))] String),
    /// No codec is registered for the format.
    #[display("unsupported document format: {_0}")]
    UnsupportedFormat(#[error(not(source))] String),
    /// Page numbers are 1-based and bounded by the page count.
    #[display("page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },
    /// Rasterization was refused or failed (for example an absurd scale).
    #[display("cannot rasterize page: {_0}")]
    Rasterize(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // Decoding is deterministic: the same bytes fail the same way.
        false
    }
}
