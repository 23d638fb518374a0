//! Document codec interface.
//!
//! A codec turns the raw bytes of one document format into something the
//! reader can work with: metadata, a page count, per-page text and per-page
//! rasters. Every format is one implementation of the same capability set
//! ([`Codec`] + [`DocumentHandle`]) registered against a [`DocumentFormat`]
//! in [`Codecs`], and selected by file type when a document is opened.
//!
//! Page numbers are 1-based throughout.
//!
//! Only the plain-text formats ship with a codec ([`PlainTextCodec`]); PDF,
//! EPUB and comic archives are recognised but need a decoder registered by
//! the embedding application.

pub mod error;
mod format;
mod text;

pub use crate::format::DocumentFormat;
pub use crate::text::PlainTextCodec;
use crate::error::{ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Metadata a codec can extract from a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// `None` when the document carries no usable title; callers fall back
    /// to the file name.
    pub title: Option<String>,
    pub author: Option<String>,
    pub file_type: DocumentFormat,
}

/// An RGBA8 bitmap, row-major, `width * height * 4` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// An opened document.
///
/// Handles are shared between reading sessions and called from blocking
/// worker threads, so implementations must be thread-safe. All methods are
/// expected to block.
pub trait DocumentHandle: Send + Sync {
    fn page_count(&self) -> usize;
    fn metadata(&self) -> Metadata;
    fn page_text(&self, page: usize) -> Result<String>;
    fn rasterize(&self, page: usize, scale: f32) -> Result<Raster>;
}

/// Opens documents of a single format.
pub trait Codec: Send + Sync {
    fn open(&self, bytes: Vec<u8>) -> Result<Box<dyn DocumentHandle>>;
}

/// Registry of codecs, one per format.
#[derive(Clone, Default)]
pub struct Codecs {
    codecs: HashMap<DocumentFormat, Arc<dyn Codec>>,
}

impl Codecs {
    /// A registry with no codecs at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry with the codecs that ship with lectern.
    pub fn builtin() -> Self {
        Self::empty()
            .with(DocumentFormat::Txt, PlainTextCodec::plain())
            .with(DocumentFormat::Markdown, PlainTextCodec::markdown())
    }

    /// Register (or replace) the codec for `format`.
    pub fn with(mut self, format: DocumentFormat, codec: impl Codec + 'static) -> Self {
        self.codecs.insert(format, Arc::new(codec));
        self
    }

    pub fn supports(&self, format: DocumentFormat) -> bool {
        self.codecs.contains_key(&format)
    }

    /// The format of `path` if it is recognised *and* can be opened.
    pub fn recognise(&self, path: impl AsRef<Path>) -> Option<DocumentFormat> {
        DocumentFormat::from_path(path).filter(|format| self.supports(*format))
    }

    /// Open `bytes` with the codec registered for `format`.
    pub fn open(&self, format: DocumentFormat, bytes: Vec<u8>) -> Result<Box<dyn DocumentHandle>> {
        let Some(codec) = self.codecs.get(&format) else {
            exn::bail!(ErrorKind::UnsupportedFormat(format.to_string()));
        };
        codec.open(bytes)
    }
}

impl std::fmt::Debug for Codecs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut formats: Vec<_> = self.codecs.keys().collect();
        formats.sort();
        f.debug_struct("Codecs").field("formats", &formats).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_handles_plain_text_only() {
        let codecs = Codecs::builtin();
        assert_eq!(codecs.recognise("notes.txt"), Some(DocumentFormat::Txt));
        assert_eq!(codecs.recognise("README.md"), Some(DocumentFormat::Markdown));
        assert_eq!(codecs.recognise("book.pdf"), None);
        assert_eq!(codecs.recognise("photo.png"), None);
    }

    #[test]
    fn opening_an_unregistered_format_fails() {
        let err = Codecs::empty().open(DocumentFormat::Epub, b"PK".to_vec()).err().unwrap();
        assert_eq!(*err, ErrorKind::UnsupportedFormat("epub".to_string()));
    }

    #[test]
    fn registered_codec_is_used() {
        let codecs = Codecs::empty().with(DocumentFormat::Pdf, PlainTextCodec::plain());
        let handle = codecs.open(DocumentFormat::Pdf, b"hello".to_vec()).unwrap();
        assert_eq!(handle.page_count(), 1);
        assert_eq!(handle.page_text(1).unwrap(), "hello");
    }
}
