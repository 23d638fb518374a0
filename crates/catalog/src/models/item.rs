use super::{count_from_db, count_to_db, timestamp_from_db, timestamp_to_db};
use crate::error::{Error, ErrorKind};
use crate::item::LibraryItem;
use exn::{OptionExt, ResultExt};
use lectern_codec::DocumentFormat;
use lectern_storage::{ContentIdentity, Signature};
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ItemRow {
    pub id: String,
    pub path: String,
    pub title: String,
    pub author: Option<String>,
    pub file_type: String,
    pub content_hash: String,
    pub file_size: i64,
    pub modified_at: i64,
    pub page_count: Option<i64>,
    pub tags: String,
    pub added_at: i64,
}

impl TryFrom<&LibraryItem> for ItemRow {
    type Error = Error;
    fn try_from(item: &LibraryItem) -> Result<Self, Self::Error> {
        Ok(Self {
            id: item.id.clone(),
            path: item.path.to_str().ok_or_raise(|| ErrorKind::InvalidData("path"))?.to_string(),
            title: item.title.clone(),
            author: item.author.clone(),
            file_type: item.file_type.to_string(),
            content_hash: item.content_hash.to_string(),
            file_size: i64::try_from(item.signature.size).or_raise(|| ErrorKind::InvalidData("file size"))?,
            modified_at: timestamp_to_db(item.signature.modified, "modified time")?,
            page_count: item.page_count.map(|count| count_to_db(count, "page count")).transpose()?,
            tags: serde_json::to_string(&item.tags).or_raise(|| ErrorKind::InvalidData("tags"))?,
            added_at: timestamp_to_db(item.added_at, "added time")?,
        })
    }
}

impl TryFrom<ItemRow> for LibraryItem {
    type Error = Error;
    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        let signature = Signature::new(
            u64::try_from(row.file_size).or_raise(|| ErrorKind::InvalidData("file size"))?,
            timestamp_from_db(row.modified_at, "modified time")?,
        );
        Ok(Self {
            id: row.id,
            path: PathBuf::from(row.path),
            title: row.title,
            author: row.author,
            file_type: row.file_type.parse::<DocumentFormat>().or_raise(|| ErrorKind::InvalidData("file type"))?,
            content_hash: ContentIdentity::from_hex(row.content_hash).or_raise(|| ErrorKind::InvalidData("content hash"))?,
            tags: serde_json::from_str::<BTreeSet<String>>(&row.tags).or_raise(|| ErrorKind::InvalidData("tags"))?,
            page_count: row.page_count.map(|count| count_from_db(count, "page count")).transpose()?,
            signature,
            added_at: timestamp_from_db(row.added_at, "added time")?,
        })
    }
}
