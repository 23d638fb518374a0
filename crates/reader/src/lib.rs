//! Reading sessions over catalogued documents.
//!
//! [`SessionManager`] opens library items as paginated sessions, renders
//! pages through a shared, memory-bounded [`RenderCache`] and answers
//! in-document searches from lazily built [`SearchIndex`]es. Everything here
//! is derived state: it lives in memory and can be dropped at any time.
//!
//! Blocking codec work (decoding, rasterizing, text extraction) runs on
//! Tokio's blocking pool under a timeout. A call that times out fails with
//! [`ErrorKind::Timeout`](crate::error::ErrorKind::Timeout) and leaves no
//! trace in the caches.

mod cache;
pub mod error;
mod handles;
mod search;
mod session;

pub use crate::cache::{CacheStats, RenderCache, RenderedPage};
pub use crate::search::{SearchIndex, SearchIndexes, SearchMatch};
pub use crate::session::{ReaderOptions, ReaderSession, SessionManager};
