//! Content store for the lectern library.
//!
//! Two cheap ways of knowing whether a file has changed live here:
//! - a [`Signature`] (size + modification time) read from filesystem
//!   metadata without touching file contents, and
//! - a [`ContentIdentity`] (BLAKE3 digest of the bytes) which is the
//!   deduplication key for the catalog and the cache key for rendered pages
//!   and search indexes.
//!
//! The [`walk`] stream enumerates candidate files below a directory root.

pub mod error;
mod identity;
mod walk;

pub use crate::identity::{ContentIdentity, Signature, fast_signature, identify, read};
pub use crate::walk::{DiscoveredFile, walk};
