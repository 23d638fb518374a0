//! Durable state for lectern: the library catalog and the annotation store.
//!
//! Both live in one SQLite database. Everything else lectern keeps (render
//! caches, search indexes, reading sessions) is derived and rebuildable.
//!
//! # Removal policy
//! Removing an item from the catalog never deletes its annotations. The
//! content hash of the removed item is remembered, and when a later scan
//! finds the same bytes again the item is recreated with its previous id,
//! which reattaches the annotations.

mod annotation;
mod db;
pub mod error;
mod item;
mod models;
mod repo;
mod store;

pub use crate::annotation::{Annotation, AnnotationChanges, AnnotationKind, NewAnnotation, Rect};
pub use crate::db::Database;
pub use crate::item::{ItemFilter, LibraryItem, MetadataPatch, NewItem};
pub use crate::repo::Catalog;
pub use crate::store::AnnotationStore;
