use lectern_codec::DocumentFormat;
use lectern_storage::{ContentIdentity, Signature};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use time::OffsetDateTime;

/// A document in the library.
///
/// There is exactly one item per distinct content identity. The `id` is
/// independent of the content so an item can move around on disk (and be
/// removed then re-added) without its annotations losing track of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LibraryItem {
    pub id: String,
    pub path: PathBuf,
    pub title: String,
    pub author: Option<String>,
    pub file_type: DocumentFormat,
    pub content_hash: ContentIdentity,
    pub tags: BTreeSet<String>,
    /// Known once the document has been decoded at least once.
    pub page_count: Option<usize>,
    #[serde(skip)]
    pub signature: Signature,
    #[serde(with = "time::serde::rfc3339")]
    pub added_at: OffsetDateTime,
}

impl LibraryItem {
    /// Does the free-text `needle` (already lower-cased) appear in the
    /// title, the author or any tag?
    pub(crate) fn mentions(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle)
            || self.author.as_deref().is_some_and(|author| author.to_lowercase().contains(needle))
            || self.tags.iter().any(|tag| tag.to_lowercase().contains(needle))
    }

    pub(crate) fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Everything the scanner knows about a document before it has a catalog id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub path: PathBuf,
    pub title: String,
    pub author: Option<String>,
    pub file_type: DocumentFormat,
    pub content_hash: ContentIdentity,
    pub signature: Signature,
    pub page_count: Option<usize>,
    pub tags: BTreeSet<String>,
}

impl NewItem {
    pub(crate) fn into_item(self, id: String) -> LibraryItem {
        LibraryItem {
            id,
            path: self.path,
            title: self.title,
            author: self.author,
            file_type: self.file_type,
            content_hash: self.content_hash,
            tags: self.tags,
            page_count: self.page_count,
            signature: self.signature,
            added_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Filters for [`Catalog::query`](crate::Catalog::query). Empty filters match
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemFilter {
    /// Case-insensitive substring over title, author and tags.
    pub text: Option<String>,
    pub file_type: Option<DocumentFormat>,
    /// Exact tag, ignoring case.
    pub tag: Option<String>,
    pub limit: Option<usize>,
}

impl ItemFilter {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), ..Self::default() }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// User edits to an item's descriptive metadata. `None` leaves a field
/// untouched; `Some(None)` clears the author.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataPatch {
    pub title: Option<String>,
    pub author: Option<Option<String>>,
    pub tags: Option<BTreeSet<String>>,
}
