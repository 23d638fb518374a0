//! Library items.
//!
//! The catalog holds one row per distinct content identity. Rows are created
//! and updated by the scanner, and edited (title, author, tags) by the user.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::item::{ItemFilter, LibraryItem, MetadataPatch, NewItem};
use crate::models::{ItemRow, count_from_db, count_to_db, timestamp_to_db};
use exn::{OptionExt, ResultExt};
use lectern_storage::{ContentIdentity, Signature};
use sqlx::{SqliteConnection, SqlitePool};
use std::path::Path;
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

/// Repository for [`LibraryItem`]s.
#[derive(Debug, Clone)]
pub struct Catalog {
    pool: SqlitePool,
}
impl From<&Database> for Catalog {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Catalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn sqlx_hates_paths(path: &Path) -> Result<&str> {
        path.to_str().ok_or_raise(|| ErrorKind::InvalidData("path"))
    }

    async fn write_row(conn: &mut SqliteConnection, row: ItemRow) -> Result<()> {
        sqlx::query(include_str!("../queries/upsert_item.sql"))
            .bind(row.id)
            .bind(row.path)
            .bind(row.title)
            .bind(row.author)
            .bind(row.file_type)
            .bind(row.content_hash)
            .bind(row.file_size)
            .bind(row.modified_at)
            .bind(row.page_count)
            .bind(row.tags)
            .bind(row.added_at)
            .execute(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn fetch_row(conn: &mut SqliteConnection, id: &str) -> Result<Option<LibraryItem>> {
        let row: Option<ItemRow> = sqlx::query_as(include_str!("../queries/get_item.sql"))
            .bind(id)
            .fetch_optional(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(LibraryItem::try_from).transpose()
    }

    /// The id for new content: the id the same content had before it was
    /// removed, or a fresh one.
    async fn claim_id(conn: &mut SqliteConnection, hash: &ContentIdentity) -> Result<String> {
        let previous: Option<String> = sqlx::query_scalar(include_str!("../queries/take_removal.sql"))
            .bind(hash.as_str())
            .fetch_optional(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if let Some(id) = &previous {
            tracing::debug!(id, hash = %hash, "Restoring previously removed item");
        }
        Ok(previous.unwrap_or_else(|| Uuid::new_v4().to_string()))
    }

    async fn delete_with_tombstone(conn: &mut SqliteConnection, item: &LibraryItem) -> Result<()> {
        sqlx::query(include_str!("../queries/delete_item.sql"))
            .bind(&item.id)
            .execute(&mut *conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/record_removal.sql"))
            .bind(item.content_hash.as_str())
            .bind(&item.id)
            .bind(timestamp_to_db(OffsetDateTime::now_utc(), "removed time")?)
            .execute(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Insert or fully overwrite an item, keyed by its id.
    pub async fn upsert(&self, item: &LibraryItem) -> Result<()> {
        let row = ItemRow::try_from(item)?;
        let mut conn = self.pool.acquire().await.or_raise(|| ErrorKind::Database)?;
        Self::write_row(&mut conn, row).await
    }

    /// Add newly discovered content, assigning it an id.
    #[instrument(skip_all, fields(path = %new.path.display()))]
    pub async fn insert(&self, new: NewItem) -> Result<LibraryItem> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let id = Self::claim_id(&mut tx, &new.content_hash).await?;
        let item = new.into_item(id);
        Self::write_row(&mut tx, ItemRow::try_from(&item)?).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(item)
    }

    /// Atomically swap the item `stale_id` for new content found at the
    /// same path. The stale item is tombstoned like [`remove`](Self::remove).
    #[instrument(skip(self, new), fields(path = %new.path.display()))]
    pub async fn replace(&self, stale_id: &str, new: NewItem) -> Result<LibraryItem> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let stale = Self::fetch_row(&mut tx, stale_id)
            .await?
            .ok_or_raise(|| ErrorKind::ItemNotFound(stale_id.to_string()))?;
        Self::delete_with_tombstone(&mut tx, &stale).await?;
        let id = Self::claim_id(&mut tx, &new.content_hash).await?;
        let item = new.into_item(id);
        Self::write_row(&mut tx, ItemRow::try_from(&item)?).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(item)
    }

    // =========================================================================
    // Get/Fetch
    // =========================================================================

    pub async fn get(&self, id: &str) -> Result<Option<LibraryItem>> {
        let mut conn = self.pool.acquire().await.or_raise(|| ErrorKind::Database)?;
        Self::fetch_row(&mut conn, id).await
    }

    /// Like [`get`](Self::get), but a missing item is an error.
    pub async fn require(&self, id: &str) -> Result<LibraryItem> {
        self.get(id).await?.ok_or_raise(|| ErrorKind::ItemNotFound(id.to_string()))
    }

    pub async fn find_by_identity(&self, hash: &ContentIdentity) -> Result<Option<LibraryItem>> {
        let row: Option<ItemRow> = sqlx::query_as(include_str!("../queries/get_item_by_hash.sql"))
            .bind(hash.as_str())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(LibraryItem::try_from).transpose()
    }

    pub async fn find_by_path(&self, path: impl AsRef<Path>) -> Result<Option<LibraryItem>> {
        let row: Option<ItemRow> = sqlx::query_as(include_str!("../queries/get_item_by_path.sql"))
            .bind(Self::sqlx_hates_paths(path.as_ref())?)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(LibraryItem::try_from).transpose()
    }

    // =========================================================================
    // Listing
    // =========================================================================

    /// Items matching `filter`, ordered by case-folded title and then id so
    /// the order is stable between calls.
    #[instrument(skip(self))]
    pub async fn query(&self, filter: &ItemFilter) -> Result<Vec<LibraryItem>> {
        let rows: Vec<ItemRow> = sqlx::query_as(include_str!("../queries/list_items.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let needle = filter.text.as_deref().map(str::trim).filter(|t| !t.is_empty()).map(str::to_lowercase);
        let mut items = Vec::new();
        for row in rows {
            let item = LibraryItem::try_from(row)?;
            if needle.as_deref().is_some_and(|needle| !item.mentions(needle)) {
                continue;
            }
            if filter.file_type.is_some_and(|file_type| item.file_type != file_type) {
                continue;
            }
            if filter.tag.as_deref().is_some_and(|tag| !item.has_tag(tag)) {
                continue;
            }
            items.push((item.title.to_lowercase(), item));
        }
        items.sort_by(|(a_title, a), (b_title, b)| a_title.cmp(b_title).then_with(|| a.id.cmp(&b.id)));
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(items.into_iter().take(limit).map(|(_, item)| item).collect())
    }

    pub async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(include_str!("../queries/count_items.sql"))
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        count_from_db(count, "item count")
    }

    // =========================================================================
    // Update
    // =========================================================================

    /// Record where an item's content now lives and its current signature.
    /// Used both for moves and for refreshing the signature in place.
    pub async fn update_location(&self, id: &str, path: impl AsRef<Path>, signature: Signature) -> Result<()> {
        let mut conn = self.pool.acquire().await.or_raise(|| ErrorKind::Database)?;
        Self::write_location(&mut conn, id, path.as_ref(), signature).await
    }

    /// Move an item onto a path that currently records other content. The
    /// stale item is removed (leaving a tombstone) in the same transaction,
    /// so either both changes land or neither does.
    pub async fn relocate(&self, id: &str, stale_id: &str, path: impl AsRef<Path>, signature: Signature) -> Result<()> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let stale = Self::fetch_row(&mut tx, stale_id)
            .await?
            .ok_or_raise(|| ErrorKind::ItemNotFound(stale_id.to_string()))?;
        Self::delete_with_tombstone(&mut tx, &stale).await?;
        Self::write_location(&mut tx, id, path.as_ref(), signature).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn write_location(conn: &mut SqliteConnection, id: &str, path: &Path, signature: Signature) -> Result<()> {
        let result = sqlx::query(include_str!("../queries/update_item_location.sql"))
            .bind(Self::sqlx_hates_paths(path)?)
            .bind(i64::try_from(signature.size).or_raise(|| ErrorKind::InvalidData("file size"))?)
            .bind(timestamp_to_db(signature.modified, "modified time")?)
            .bind(id)
            .execute(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if result.rows_affected() == 0 {
            exn::bail!(ErrorKind::ItemNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Remember the page count so later opens don't need to ask the codec.
    pub async fn set_page_count(&self, id: &str, pages: usize) -> Result<()> {
        let result = sqlx::query(include_str!("../queries/update_page_count.sql"))
            .bind(count_to_db(pages, "page count")?)
            .bind(id)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if result.rows_affected() == 0 {
            exn::bail!(ErrorKind::ItemNotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn update_metadata(&self, id: &str, patch: MetadataPatch) -> Result<LibraryItem> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let mut item = Self::fetch_row(&mut tx, id).await?.ok_or_raise(|| ErrorKind::ItemNotFound(id.to_string()))?;
        if let Some(title) = patch.title {
            item.title = title;
        }
        if let Some(author) = patch.author {
            item.author = author;
        }
        if let Some(tags) = patch.tags {
            item.tags = tags;
        }
        sqlx::query(include_str!("../queries/update_item_metadata.sql"))
            .bind(&item.title)
            .bind(&item.author)
            .bind(serde_json::to_string(&item.tags).or_raise(|| ErrorKind::InvalidData("tags"))?)
            .bind(id)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(item)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Remove an item from the catalog.
    ///
    /// Annotations on the item are kept. If the same content is scanned
    /// again later it comes back under the same id and the annotations
    /// reattach.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: &str) -> Result<LibraryItem> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let item = Self::fetch_row(&mut tx, id).await?.ok_or_raise(|| ErrorKind::ItemNotFound(id.to_string()))?;
        Self::delete_with_tombstone(&mut tx, &item).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_codec::DocumentFormat;
    use rstest::rstest;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    async fn catalog() -> Catalog {
        Catalog::from(&Database::connect_in_memory().await.unwrap())
    }

    fn new_item(path: &str, title: &str, body: &str) -> NewItem {
        NewItem {
            path: PathBuf::from(path),
            title: title.to_string(),
            author: None,
            file_type: DocumentFormat::Txt,
            content_hash: lectern_storage::identify(body),
            signature: Signature::new(body.len() as u64, OffsetDateTime::UNIX_EPOCH),
            page_count: None,
            tags: BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn insert_then_find() {
        let catalog = catalog().await;
        let item = catalog.insert(new_item("/lib/a.txt", "Alpha", "alpha")).await.unwrap();
        assert_eq!(catalog.get(&item.id).await.unwrap().as_ref(), Some(&item));
        assert_eq!(catalog.find_by_path("/lib/a.txt").await.unwrap().as_ref(), Some(&item));
        assert_eq!(catalog.find_by_identity(&item.content_hash).await.unwrap().as_ref(), Some(&item));
        assert_eq!(catalog.find_by_path("/lib/b.txt").await.unwrap(), None);
        assert_eq!(catalog.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_identity_is_refused() {
        let catalog = catalog().await;
        catalog.insert(new_item("/lib/a.txt", "Alpha", "same")).await.unwrap();
        let err = catalog.insert(new_item("/lib/b.txt", "Beta", "same")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Database));
        assert_eq!(catalog.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_overwrites_by_id() {
        let catalog = catalog().await;
        let mut item = catalog.insert(new_item("/lib/a.txt", "Alpha", "alpha")).await.unwrap();
        item.title = "Alpha, revised".to_string();
        item.page_count = Some(12);
        catalog.upsert(&item).await.unwrap();
        assert_eq!(catalog.require(&item.id).await.unwrap(), item);
    }

    #[tokio::test]
    async fn location_updates_keep_the_id() {
        let catalog = catalog().await;
        let item = catalog.insert(new_item("/lib/a.txt", "Alpha", "alpha")).await.unwrap();
        let signature = Signature::new(5, OffsetDateTime::now_utc());
        catalog.update_location(&item.id, "/lib/moved/a.txt", signature).await.unwrap();
        let moved = catalog.find_by_path("/lib/moved/a.txt").await.unwrap().unwrap();
        assert_eq!(moved.id, item.id);
        assert_eq!(moved.signature, signature);
        assert_eq!(catalog.find_by_path("/lib/a.txt").await.unwrap(), None);

        let err = catalog.update_location("missing", "/x.txt", signature).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ItemNotFound(_)));
    }

    #[tokio::test]
    async fn relocate_takes_over_a_path() {
        let catalog = catalog().await;
        let moving = catalog.insert(new_item("/lib/a.txt", "Alpha", "alpha")).await.unwrap();
        let stale = catalog.insert(new_item("/lib/b.txt", "Beta", "beta")).await.unwrap();
        let signature = Signature::new(5, OffsetDateTime::now_utc());
        catalog.relocate(&moving.id, &stale.id, "/lib/b.txt", signature).await.unwrap();
        assert_eq!(catalog.find_by_path("/lib/b.txt").await.unwrap().unwrap().id, moving.id);
        assert_eq!(catalog.get(&stale.id).await.unwrap(), None);
        assert_eq!(catalog.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_relocate_changes_nothing() {
        let catalog = catalog().await;
        let stale = catalog.insert(new_item("/lib/b.txt", "Beta", "beta")).await.unwrap();
        let signature = Signature::new(5, OffsetDateTime::now_utc());
        let err = catalog.relocate("missing", &stale.id, "/lib/b.txt", signature).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ItemNotFound(_)));
        assert_eq!(catalog.get(&stale.id).await.unwrap().as_ref(), Some(&stale));
        // The stale item still owns its content.
        let other = catalog.insert(new_item("/lib/c.txt", "Gamma", "beta")).await;
        assert!(other.is_err());
    }

    #[tokio::test]
    async fn removed_content_comes_back_with_its_id() {
        let catalog = catalog().await;
        let item = catalog.insert(new_item("/lib/a.txt", "Alpha", "alpha")).await.unwrap();
        let removed = catalog.remove(&item.id).await.unwrap();
        assert_eq!(removed.id, item.id);
        assert_eq!(catalog.count().await.unwrap(), 0);

        let again = catalog.insert(new_item("/elsewhere/a.txt", "Alpha", "alpha")).await.unwrap();
        assert_eq!(again.id, item.id);
        // The tombstone is consumed.
        let fresh = catalog.insert(new_item("/lib/b.txt", "Beta", "beta")).await.unwrap();
        assert_ne!(fresh.id, item.id);

        let err = catalog.remove("missing").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ItemNotFound(_)));
    }

    #[tokio::test]
    async fn replace_swaps_content_at_a_path() {
        let catalog = catalog().await;
        let old = catalog.insert(new_item("/lib/a.txt", "Alpha", "first draft")).await.unwrap();
        let new = catalog.replace(&old.id, new_item("/lib/a.txt", "Alpha", "second draft")).await.unwrap();
        assert_ne!(new.id, old.id);
        assert_eq!(catalog.count().await.unwrap(), 1);
        assert_eq!(catalog.find_by_path("/lib/a.txt").await.unwrap().unwrap().id, new.id);
        assert_eq!(catalog.find_by_identity(&old.content_hash).await.unwrap(), None);
    }

    #[tokio::test]
    async fn metadata_edits_and_page_count() {
        let catalog = catalog().await;
        let item = catalog.insert(new_item("/lib/a.txt", "Alpha", "alpha")).await.unwrap();
        let patch = MetadataPatch {
            author: Some(Some("Ann Author".to_string())),
            tags: Some(BTreeSet::from(["Poetry".to_string()])),
            ..MetadataPatch::default()
        };
        let edited = catalog.update_metadata(&item.id, patch).await.unwrap();
        assert_eq!(edited.title, "Alpha");
        assert_eq!(edited.author.as_deref(), Some("Ann Author"));
        catalog.set_page_count(&item.id, 7).await.unwrap();
        let stored = catalog.require(&item.id).await.unwrap();
        assert_eq!(stored.page_count, Some(7));
        assert!(stored.tags.contains("Poetry"));

        let err = catalog.set_page_count("missing", 1).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ItemNotFound(_)));
    }

    async fn seeded() -> Catalog {
        let catalog = catalog().await;
        let mut dune = new_item("/lib/dune.txt", "dune", "dune");
        dune.author = Some("Frank Herbert".to_string());
        dune.tags = BTreeSet::from(["SciFi".to_string()]);
        catalog.insert(dune).await.unwrap();
        catalog.insert(new_item("/lib/emma.txt", "Emma", "emma")).await.unwrap();
        let mut notes = new_item("/lib/notes.md", "Atlas notes", "notes");
        notes.file_type = DocumentFormat::Markdown;
        notes.tags = BTreeSet::from(["scifi-research".to_string()]);
        catalog.insert(notes).await.unwrap();
        catalog
    }

    #[rstest]
    #[case(ItemFilter::default(), &["Atlas notes", "dune", "Emma"])]
    #[case(ItemFilter::text("HERBERT"), &["dune"])]
    #[case(ItemFilter::text("scifi"), &["Atlas notes", "dune"])]
    #[case(ItemFilter::text("   "), &["Atlas notes", "dune", "Emma"])]
    #[case(ItemFilter::text("zzz"), &[])]
    #[case(ItemFilter::default().with_limit(2), &["Atlas notes", "dune"])]
    #[case(ItemFilter { file_type: Some(DocumentFormat::Markdown), ..ItemFilter::default() }, &["Atlas notes"])]
    #[case(ItemFilter { tag: Some("scifi".to_string()), ..ItemFilter::default() }, &["dune"])]
    #[tokio::test]
    async fn query_filters_and_orders(#[case] filter: ItemFilter, #[case] expected: &[&str]) {
        let catalog = seeded().await;
        let titles: Vec<String> = catalog.query(&filter).await.unwrap().into_iter().map(|i| i.title).collect();
        assert_eq!(titles, expected);
    }

    #[tokio::test]
    async fn equal_titles_are_ordered_by_id() {
        let catalog = catalog().await;
        for body in ["one", "two", "three"] {
            catalog.insert(new_item(&format!("/lib/{body}.txt"), "Same", body)).await.unwrap();
        }
        let items = catalog.query(&ItemFilter::default()).await.unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
